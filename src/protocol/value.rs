use std::fmt;

use serde_json::{Map, Number, Value as Json};

use crate::error::{Error, Result};

/// A decoded or freshly built wire message.
///
/// Values are never mutated once built: a sender constructs one, encodes it
/// and drops it; a receiver decodes one, reads it and drops it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    /// Entries keep their wire order.
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn object<K>(entries: impl IntoIterator<Item = (K, Value)>) -> Self
    where
        K: Into<String>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn has_key(&self, key: &str) -> bool {
        match self {
            Value::Object(entries) => entries.iter().any(|(k, _)| k == key),
            _ => false,
        }
    }

    /// Looks up `key` in an object.
    pub fn get_key(&self, key: &str) -> Result<&Value> {
        match self {
            Value::Object(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| Error::NotFound(key.to_owned())),
            other => Err(other.mismatch("object")),
        }
    }

    /// Element `index` of an array.
    pub fn get_at(&self, index: usize) -> Result<&Value> {
        match self {
            Value::Array(items) => items.get(index).ok_or(Error::OutOfBounds {
                index,
                len: items.len(),
            }),
            other => Err(other.mismatch("array")),
        }
    }

    /// Number of keys, elements or string bytes.
    pub fn len(&self) -> Result<usize> {
        match self {
            Value::Object(entries) => Ok(entries.len()),
            Value::Array(items) => Ok(items.len()),
            Value::Str(s) => Ok(s.len()),
            other => Err(other.mismatch("object, array or string")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(other.mismatch("integer")),
        }
    }

    /// A yes/no answer that peers send either as a bool or as 0/1.
    pub fn as_flag(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(other.mismatch("bool or integer")),
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::Protocol(format!("expected {expected}, found {}", self.kind()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Json::from(self))
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for Json {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            // JSON has no NaN or infinity; those go out as null.
            Value::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Json::from).collect()),
            Value::Object(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Json::from(v)))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u16> for Value {
    fn from(port: u16) -> Self {
        Value::Int(port.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::object([
            ("name", Value::from("dev-1")),
            ("ports", Value::array([Value::from(5000), Value::from(5001)])),
            ("up", Value::from(true)),
        ])
    }

    #[test]
    fn test_get_key() {
        let v = sample();
        assert!(v.has_key("ports"));
        assert!(!v.has_key("missing"));
        assert_eq!(v.get_key("name").unwrap().as_str().unwrap(), "dev-1");
        assert!(matches!(v.get_key("missing"), Err(Error::NotFound(k)) if k == "missing"));
    }

    #[test]
    fn test_get_key_on_non_object() {
        let v = Value::from("dev-1");
        assert!(matches!(v.get_key("name"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_get_at_bounds() {
        let ports = sample().get_key("ports").unwrap().clone();
        assert_eq!(ports.get_at(1).unwrap().as_int().unwrap(), 5001);
        assert!(matches!(
            ports.get_at(2),
            Err(Error::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_len() {
        let v = sample();
        assert_eq!(v.len().unwrap(), 3);
        assert_eq!(v.get_key("ports").unwrap().len().unwrap(), 2);
        assert_eq!(v.get_key("name").unwrap().len().unwrap(), 5);
        assert!(matches!(Value::from(1).len(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_type_mismatch() {
        assert!(matches!(Value::from(1).as_str(), Err(Error::Protocol(_))));
        assert!(matches!(Value::from("1").as_int(), Err(Error::Protocol(_))));
        assert!(matches!(Value::from(1).as_bool(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_flag_accepts_bool_and_int() {
        assert!(Value::from(true).as_flag().unwrap());
        assert!(Value::from(1).as_flag().unwrap());
        assert!(!Value::from(0).as_flag().unwrap());
        assert!(Value::from("yes").as_flag().is_err());
    }

    #[test]
    fn test_object_keeps_wire_order() {
        assert_eq!(
            sample().to_string(),
            r#"{"name":"dev-1","ports":[5000,5001],"up":true}"#
        );
    }
}
