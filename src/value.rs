use crate::result::{ConduitError, Result};

/// Scalar value exchanged with a backend, both as a bound parameter and as a column value.
/// `Null` is the absence-marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type label used in mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
        }
    }

    /// Empty text is stored as the absence-marker
    pub fn normalized(self) -> Value {
        match self {
            Value::Text(s) if s.is_empty() => Value::Null,
            other => other,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = ConduitError;

    fn try_from(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None => n.as_f64().map(Value::Real).ok_or_else(|| {
                    ConduitError::new_parameter_type_mismatch("representable number", n.to_string())
                }),
            },
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            other => Err(ConduitError::new_parameter_type_mismatch(
                "scalar JSON value",
                other.to_string(),
            )),
        }
    }
}

/// Typed extraction of a column value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;

    fn expected() -> &'static str;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }

    fn expected() -> &'static str {
        "any"
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "integer"
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| i32::try_from(i).ok())
    }

    fn expected() -> &'static str {
        "32-bit integer"
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "real"
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            // SQLite stores booleans as integers
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "boolean"
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "text"
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "blob"
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn expected() -> &'static str {
        T::expected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_text_normalizes_to_null() {
        assert_eq!(Value::from("").normalized(), Value::Null);
        assert_eq!(Value::Null.normalized(), Value::Null);
        // Whitespace is a value, not an absence
        assert_eq!(Value::from(" ").normalized(), Value::Text(" ".to_string()));
        assert_eq!(Value::Integer(0).normalized(), Value::Integer(0));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::try_from(&json!(5)).unwrap(), Value::Integer(5));
        assert_eq!(Value::try_from(&json!(1.5)).unwrap(), Value::Real(1.5));
        assert_eq!(Value::try_from(&json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::try_from(&json!(true)).unwrap(), Value::Boolean(true));
        assert_eq!(
            Value::try_from(&json!("x")).unwrap(),
            Value::Text("x".to_string())
        );
    }

    #[test]
    fn test_from_json_rejects_containers() {
        let err = Value::try_from(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ConduitError::ParameterTypeMismatch { .. }));
        let err = Value::try_from(&json!({"a": 1})).unwrap_err();
        assert!(matches!(err, ConduitError::ParameterTypeMismatch { .. }));
    }

    #[test]
    fn test_from_value_extraction() {
        assert_eq!(i64::from_value(&Value::Integer(7)), Some(7));
        assert_eq!(i32::from_value(&Value::Integer(i64::MAX)), None);
        assert_eq!(f64::from_value(&Value::Integer(2)), Some(2.0));
        assert_eq!(bool::from_value(&Value::Integer(1)), Some(true));
        assert_eq!(bool::from_value(&Value::Integer(2)), None);
        assert_eq!(String::from_value(&Value::Integer(2)), None);
        assert_eq!(Option::<String>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(&Value::Text("x".into())), None);
    }
}
