use std::cmp::Ordering;

use regex::Regex;
use semver::Version;

use crate::{
    attributes::get_path,
    condition::{Condition, ElemMatch, Operator, ValueTest},
    AttributeValue, Attributes,
};

impl Condition {
    /// Evaluate the condition against `attributes`.
    ///
    /// Evaluation is total: missing attributes and type mismatches make the affected test fail
    /// instead of erroring. A missing attribute only passes `$exists: false` (and negations).
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Condition::And(conditions) => conditions.iter().all(|c| c.matches(attributes)),
            Condition::Or(conditions) => {
                conditions.is_empty() || conditions.iter().any(|c| c.matches(attributes))
            }
            Condition::Nor(conditions) => !conditions.iter().any(|c| c.matches(attributes)),
            Condition::Not(condition) => !condition.matches(attributes),
            Condition::Attribute { path, test } => test.eval(get_path(attributes, path)),
        }
    }
}

impl ValueTest {
    fn eval(&self, attribute: Option<&AttributeValue>) -> bool {
        match self {
            ValueTest::Equals(expected) => attribute == Some(expected),
            ValueTest::Operators(operators) => operators.iter().all(|op| op.eval(attribute)),
        }
    }
}

impl Operator {
    /// Applying `Operator` to the attribute. Returns `false` if the operator cannot be applied.
    fn eval(&self, attribute: Option<&AttributeValue>) -> bool {
        match self {
            Operator::Exists(expected) => {
                attribute.is_some_and(AttributeValue::is_present) == *expected
            }
            Operator::Not(test) => !test.eval(attribute),
            _ => attribute
                .and_then(|value| self.try_eval(value))
                .unwrap_or(false),
        }
    }

    /// Try applying `Operator` to a present attribute, returning `None` if the operator cannot be
    /// applied.
    fn try_eval(&self, value: &AttributeValue) -> Option<bool> {
        match self {
            Operator::Eq(expected) => Some(value == expected),
            Operator::Ne(expected) => Some(value != expected),

            Operator::Lt(expected) => Some(compare(value, expected)? == Ordering::Less),
            Operator::Lte(expected) => Some(compare(value, expected)? != Ordering::Greater),
            Operator::Gt(expected) => Some(compare(value, expected)? == Ordering::Greater),
            Operator::Gte(expected) => Some(compare(value, expected)? != Ordering::Less),

            Operator::VersionEq(expected) => Some(compare_versions(value, expected)?.is_eq()),
            Operator::VersionNe(expected) => Some(compare_versions(value, expected)?.is_ne()),
            Operator::VersionLt(expected) => Some(compare_versions(value, expected)?.is_lt()),
            Operator::VersionLte(expected) => Some(compare_versions(value, expected)?.is_le()),
            Operator::VersionGt(expected) => Some(compare_versions(value, expected)?.is_gt()),
            Operator::VersionGte(expected) => Some(compare_versions(value, expected)?.is_ge()),

            Operator::Regex(pattern) => {
                let s = value.as_str()?;
                let regex = Regex::new(pattern).ok()?;
                Some(regex.is_match(s))
            }

            Operator::In(values) => Some(is_in(value, values)),
            Operator::NotIn(values) => Some(!is_in(value, values)),

            Operator::All(expected) => {
                let AttributeValue::Array(items) = value else {
                    return None;
                };
                Some(expected.iter().all(|e| items.contains(e)))
            }

            Operator::Type(expected) => Some(value.type_name() == expected),

            Operator::Size(test) => {
                let AttributeValue::Array(items) = value else {
                    return None;
                };
                Some(test.eval(Some(&AttributeValue::Number(items.len() as f64))))
            }

            Operator::ElemMatch(elem_match) => {
                let AttributeValue::Array(items) = value else {
                    return None;
                };
                Some(items.iter().any(|item| match &**elem_match {
                    ElemMatch::Value(test) => test.eval(Some(item)),
                    ElemMatch::Condition(condition) => match item {
                        AttributeValue::Object(object) => condition.matches(object),
                        _ => false,
                    },
                }))
            }

            // Handled in eval().
            Operator::Exists(_) | Operator::Not(_) => None,
        }
    }
}

/// Array attributes match if any of their elements is listed.
fn is_in(value: &AttributeValue, values: &[AttributeValue]) -> bool {
    match value {
        AttributeValue::Array(items) => items.iter().any(|item| values.contains(item)),
        _ => values.contains(value),
    }
}

/// Numbers compare numerically (numeric strings are coerced), strings lexicographically.
fn compare(value: &AttributeValue, expected: &AttributeValue) -> Option<Ordering> {
    match (value, expected) {
        (AttributeValue::String(a), AttributeValue::String(b)) => Some(a.cmp(b)),
        _ => as_number(value)?.partial_cmp(&as_number(expected)?),
    }
}

fn as_number(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare_versions(value: &AttributeValue, expected: &str) -> Option<Ordering> {
    let attribute_version = parse_version(value.as_str()?)?;
    let condition_version = parse_version(expected)?;
    Some(attribute_version.cmp_precedence(&condition_version))
}

/// Lenient semver parsing: accepts a leading `v`, ignores build metadata, and pads missing minor
/// and patch components with zeros.
fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    let s = s.split('+').next()?;
    let (core, pre) = match s.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (s, None),
    };

    let mut parts = core.split('.').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    parts.resize(3, "0");

    let padded = match pre {
        Some(pre) => format!("{}-{}", parts.join("."), pre),
        None => parts.join("."),
    };
    Version::parse(&padded).ok()
}
