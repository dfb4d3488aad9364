use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// # Examples
/// ```
/// # use bucketing::{Attributes, AttributeValue};
/// let attributes = [
///     ("id".to_owned(), "user_12345".into()),
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of a context attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// An array of values.
    Array(Vec<AttributeValue>),
    /// A nested object.
    Object(HashMap<String, AttributeValue>),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    /// Return string slice if the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Return `true` unless the value is `Null`.
    pub fn is_present(&self) -> bool {
        !matches!(self, AttributeValue::Null)
    }

    /// Render the value as an identifier suitable for hashing.
    ///
    /// Empty strings, nulls, arrays and objects are not usable identifiers.
    pub fn to_identifier(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) if !s.is_empty() => Some(s.clone()),
            AttributeValue::Number(n) if n.is_finite() => Some(n.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Name of the value type as used by the `$type` condition operator.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Array(_) => "array",
            AttributeValue::Object(_) => "object",
            AttributeValue::Null => "null",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Look up an attribute by name. If there's no attribute with the exact name, `path` is treated
/// as a dot-separated path into nested objects.
pub(crate) fn get_path<'a>(attributes: &'a Attributes, path: &str) -> Option<&'a AttributeValue> {
    if let Some(value) = attributes.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = attributes.get(parts.next()?)?;
    for part in parts {
        match current {
            AttributeValue::Object(object) => current = object.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{get_path, AttributeValue, Attributes};

    #[test]
    fn parses_nested_json() {
        let attributes: Attributes = serde_json::from_str(
            r#"{"id": "u1", "age": 42, "tags": ["a", "b"], "company": {"name": "acme"}, "x": null}"#,
        )
        .unwrap();

        assert_eq!(attributes["id"], AttributeValue::from("u1"));
        assert_eq!(attributes["age"], AttributeValue::Number(42.0));
        assert_eq!(
            attributes["tags"],
            AttributeValue::Array(vec!["a".into(), "b".into()])
        );
        assert_eq!(attributes["x"], AttributeValue::Null);
        assert_eq!(
            get_path(&attributes, "company.name"),
            Some(&AttributeValue::from("acme"))
        );
        assert_eq!(get_path(&attributes, "company.size"), None);
        assert_eq!(get_path(&attributes, "id.name"), None);
    }

    #[test]
    fn exact_key_wins_over_path() {
        let attributes: Attributes = HashMap::from([
            ("a.b".to_owned(), "flat".into()),
            (
                "a".to_owned(),
                AttributeValue::Object(HashMap::from([("b".to_owned(), "nested".into())])),
            ),
        ]);
        assert_eq!(get_path(&attributes, "a.b"), Some(&"flat".into()));
    }

    #[test]
    fn identifiers() {
        assert_eq!(
            AttributeValue::from("user_1").to_identifier(),
            Some("user_1".to_owned())
        );
        assert_eq!(AttributeValue::from(42.0).to_identifier(), Some("42".to_owned()));
        assert_eq!(AttributeValue::from(1.5).to_identifier(), Some("1.5".to_owned()));
        assert_eq!(AttributeValue::from("").to_identifier(), None);
        assert_eq!(AttributeValue::Null.to_identifier(), None);
        assert_eq!(AttributeValue::Array(vec![]).to_identifier(), None);
    }
}
