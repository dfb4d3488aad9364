//! Targeting condition expression tree.
//!
//! Conditions are written as MongoDB-style JSON documents:
//!
//! ```json
//! {"country": {"$in": ["US", "CA"]}, "$or": [{"age": {"$gte": 18}}, {"verified": true}]}
//! ```
//!
//! They are parsed once into a [`Condition`] tree and evaluated by recursive descent (see
//! `rules.rs`).
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::AttributeValue;

/// A boolean expression over context attributes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ConditionWire")]
pub enum Condition {
    /// All sub-conditions must match. Empty list matches everything.
    And(Vec<Condition>),
    /// At least one sub-condition must match. Empty list matches everything.
    Or(Vec<Condition>),
    /// No sub-condition may match.
    Nor(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// Test applied to a single attribute.
    Attribute {
        /// Attribute name or dot-separated path into nested objects.
        path: String,
        /// Test to apply to the attribute value.
        test: ValueTest,
    },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::And(Vec::new())
    }
}

/// Test applied to a single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTest {
    /// Bare value in the condition: deep equality.
    Equals(AttributeValue),
    /// Operator object: every operator must pass.
    Operators(Vec<Operator>),
}

/// Attribute operator.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Operator {
    Eq(AttributeValue),
    Ne(AttributeValue),
    Lt(AttributeValue),
    Lte(AttributeValue),
    Gt(AttributeValue),
    Gte(AttributeValue),
    /// Semantic version comparisons.
    VersionEq(String),
    VersionNe(String),
    VersionLt(String),
    VersionLte(String),
    VersionGt(String),
    VersionGte(String),
    Regex(String),
    In(Vec<AttributeValue>),
    NotIn(Vec<AttributeValue>),
    /// Array attribute contains every listed value.
    All(Vec<AttributeValue>),
    Exists(bool),
    Type(String),
    /// Test applied to the length of an array attribute.
    Size(Box<ValueTest>),
    /// At least one element of an array attribute passes.
    ElemMatch(Box<ElemMatch>),
    Not(Box<ValueTest>),
}

/// Test applied to elements of an array by `$elemMatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatch {
    /// Elements are plain values tested with operators.
    Value(ValueTest),
    /// Elements are objects tested with a nested condition.
    Condition(Condition),
}

/// Error parsing condition JSON.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConditionParseError {
    #[error("condition is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("expected {expected} for {key}")]
    UnexpectedType {
        key: String,
        expected: &'static str,
    },
    #[error("unknown operator {0}")]
    UnknownOperator(String),
}

/// Conditions are stored either as JSON-encoded strings or inline objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionWire {
    Encoded(String),
    Inline(Value),
}

impl TryFrom<ConditionWire> for Condition {
    type Error = ConditionParseError;

    fn try_from(value: ConditionWire) -> Result<Self, Self::Error> {
        match value {
            ConditionWire::Encoded(s) => Condition::parse(&s),
            ConditionWire::Inline(value) => Condition::try_from(value),
        }
    }
}

impl TryFrom<Value> for Condition {
    type Error = ConditionParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(object) => parse_object(object),
            // Null condition is the same as no condition.
            Value::Null => Ok(Condition::default()),
            _ => Err(ConditionParseError::UnexpectedType {
                key: "condition".to_owned(),
                expected: "object",
            }),
        }
    }
}

impl Condition {
    /// Parse a JSON-encoded condition. Empty string is accepted and matches everything.
    pub fn parse(s: &str) -> Result<Condition, ConditionParseError> {
        if s.trim().is_empty() {
            return Ok(Condition::default());
        }
        let value: Value = serde_json::from_str(s)
            .map_err(|err| ConditionParseError::InvalidJson(err.to_string()))?;
        Condition::try_from(value)
    }
}

fn parse_object(object: Map<String, Value>) -> Result<Condition, ConditionParseError> {
    let mut conditions = object
        .into_iter()
        .map(|(key, value)| parse_entry(key, value))
        .collect::<Result<Vec<_>, _>>()?;

    if conditions.len() == 1 {
        Ok(conditions.remove(0))
    } else {
        Ok(Condition::And(conditions))
    }
}

fn parse_entry(key: String, value: Value) -> Result<Condition, ConditionParseError> {
    match key.as_str() {
        "$and" => Ok(Condition::And(parse_list(&key, value)?)),
        "$or" => Ok(Condition::Or(parse_list(&key, value)?)),
        "$nor" => Ok(Condition::Nor(parse_list(&key, value)?)),
        "$not" => match value {
            Value::Object(object) => Ok(Condition::Not(Box::new(parse_object(object)?))),
            _ => Err(unexpected(&key, "object")),
        },
        _ => Ok(Condition::Attribute {
            test: parse_value_test(value)?,
            path: key,
        }),
    }
}

fn parse_list(key: &str, value: Value) -> Result<Vec<Condition>, ConditionParseError> {
    let Value::Array(items) = value else {
        return Err(unexpected(key, "array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(object) => parse_object(object),
            _ => Err(unexpected(key, "array of objects")),
        })
        .collect()
}

fn is_operator_map(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|key| key.starts_with('$'))
}

fn is_operator_object(value: &Value) -> bool {
    matches!(value, Value::Object(object) if is_operator_map(object))
}

fn parse_value_test(value: Value) -> Result<ValueTest, ConditionParseError> {
    match value {
        Value::Object(object) if is_operator_map(&object) => {
            let operators = object
                .into_iter()
                .map(|(key, value)| parse_operator(key, value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ValueTest::Operators(operators))
        }
        value => Ok(ValueTest::Equals(to_attribute_value(value))),
    }
}

fn parse_operator(key: String, value: Value) -> Result<Operator, ConditionParseError> {
    let op = match key.as_str() {
        "$eq" => Operator::Eq(to_attribute_value(value)),
        "$ne" => Operator::Ne(to_attribute_value(value)),
        "$lt" => Operator::Lt(to_attribute_value(value)),
        "$lte" => Operator::Lte(to_attribute_value(value)),
        "$gt" => Operator::Gt(to_attribute_value(value)),
        "$gte" => Operator::Gte(to_attribute_value(value)),
        "$veq" => Operator::VersionEq(expect_string(&key, value)?),
        "$vne" => Operator::VersionNe(expect_string(&key, value)?),
        "$vlt" => Operator::VersionLt(expect_string(&key, value)?),
        "$vlte" => Operator::VersionLte(expect_string(&key, value)?),
        "$vgt" => Operator::VersionGt(expect_string(&key, value)?),
        "$vgte" => Operator::VersionGte(expect_string(&key, value)?),
        "$regex" => Operator::Regex(expect_string(&key, value)?),
        "$in" => Operator::In(expect_array(&key, value)?),
        "$nin" => Operator::NotIn(expect_array(&key, value)?),
        "$all" => Operator::All(expect_array(&key, value)?),
        "$exists" => match value {
            Value::Bool(b) => Operator::Exists(b),
            _ => return Err(unexpected(&key, "boolean")),
        },
        "$type" => Operator::Type(expect_string(&key, value)?),
        "$size" => Operator::Size(Box::new(parse_value_test(value)?)),
        "$elemMatch" => {
            let elem_match = if is_operator_object(&value) {
                ElemMatch::Value(parse_value_test(value)?)
            } else {
                ElemMatch::Condition(Condition::try_from(value)?)
            };
            Operator::ElemMatch(Box::new(elem_match))
        }
        "$not" => Operator::Not(Box::new(parse_value_test(value)?)),
        _ => return Err(ConditionParseError::UnknownOperator(key)),
    };
    Ok(op)
}

fn to_attribute_value(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Boolean(b),
        Value::Number(n) => n.as_f64().map_or(AttributeValue::Null, AttributeValue::Number),
        Value::String(s) => AttributeValue::String(s),
        Value::Array(items) => {
            AttributeValue::Array(items.into_iter().map(to_attribute_value).collect())
        }
        Value::Object(object) => AttributeValue::Object(
            object
                .into_iter()
                .map(|(key, value)| (key, to_attribute_value(value)))
                .collect(),
        ),
    }
}

fn expect_string(key: &str, value: Value) -> Result<String, ConditionParseError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(unexpected(key, "string")),
    }
}

fn expect_array(key: &str, value: Value) -> Result<Vec<AttributeValue>, ConditionParseError> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(to_attribute_value).collect()),
        _ => Err(unexpected(key, "array")),
    }
}

fn unexpected(key: &str, expected: &'static str) -> ConditionParseError {
    ConditionParseError::UnexpectedType {
        key: key.to_owned(),
        expected,
    }
}
