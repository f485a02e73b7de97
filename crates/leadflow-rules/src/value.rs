//! Typed field values that conditions compare against.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// A resolved field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Text.
    Text(String),
    /// Any number; integers are widened.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// A list of scalars, e.g. tags.
    List(Vec<FieldValue>),
}

/// Field name to value, for either an entity or a request context.
pub type FieldMap = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Convert a JSON value. `null` and objects have no field value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Object(_) => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(items) => Some(Self::List(items.iter().filter_map(Self::from_json).collect())),
        }
    }

    /// Numeric reading: numbers as-is, text if it parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Bool(_) | Self::List(_) => None,
        }
    }

    /// Short type name for fault messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Build a [`FieldMap`] from a JSON object, dropping `null` and nested objects.
pub fn field_map_from_json(object: &serde_json::Map<String, Value>) -> FieldMap {
    object
        .iter()
        .filter_map(|(k, v)| FieldValue::from_json(v).map(|fv| (k.clone(), fv)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion() {
        assert_eq!(FieldValue::from_json(&json!("IN")), Some(FieldValue::Text("IN".into())));
        assert_eq!(FieldValue::from_json(&json!(42)), Some(FieldValue::Number(42.0)));
        assert_eq!(FieldValue::from_json(&json!(true)), Some(FieldValue::Bool(true)));
        assert_eq!(FieldValue::from_json(&json!(null)), None);
        assert_eq!(FieldValue::from_json(&json!({"a": 1})), None);
        assert_eq!(
            FieldValue::from_json(&json!(["a", null, 2])),
            Some(FieldValue::List(vec![FieldValue::from("a"), FieldValue::Number(2.0)]))
        );
    }

    #[test]
    fn numeric_text_reads_as_number() {
        assert_eq!(FieldValue::from("50").as_number(), Some(50.0));
        assert_eq!(FieldValue::from(" 7.5 ").as_number(), Some(7.5));
        assert_eq!(FieldValue::from("fifty").as_number(), None);
        assert_eq!(FieldValue::from("NaN").as_number(), None);
        assert_eq!(FieldValue::Bool(true).as_number(), None);
    }

    #[test]
    fn map_from_json_object() {
        let obj = json!({"source": "webhook", "budget": 5000, "notes": null});
        let map = field_map_from_json(obj.as_object().unwrap());
        assert_eq!(map.len(), 2);
        assert_eq!(map["source"], FieldValue::from("webhook"));
        assert_eq!(map["budget"], FieldValue::Number(5000.0));
    }

    #[test]
    fn display_list() {
        let v = FieldValue::List(vec!["a".into(), FieldValue::Number(1.0)]);
        assert_eq!(v.to_string(), "[a, 1]");
    }
}
