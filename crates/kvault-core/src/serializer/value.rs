use std::collections::BTreeMap;
use std::fmt;

use crate::serializer::error::SerializationError;

/// Caller metadata stored alongside a value and round-tripped verbatim
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// An application payload.
///
/// Values pass through the core untouched; only the serializer looks inside
/// them, and it guarantees every representable value decodes back to the
/// same variant with the same content.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    /// Raw bytes. Only representable at the top level of a value.
    Binary(Vec<u8>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to plain JSON. Binary payloads have no plain JSON form and
    /// are rejected; the envelope handles a top-level binary separately.
    pub fn to_json(&self) -> Result<serde_json::Value, SerializationError> {
        Ok(match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(_) => {
                return Err(SerializationError::Unrepresentable(
                    "binary values nested inside an array or map".to_string(),
                ));
            }
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| SerializationError::Unrepresentable(format!("non-finite float {}", f)))?,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    object.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(object)
            }
        })
    }

    /// Convert from plain JSON. `null` has no counterpart and is rejected.
    pub fn from_json(json: serde_json::Value) -> Result<Self, SerializationError> {
        Ok(match json {
            serde_json::Value::Null => {
                return Err(SerializationError::Unrepresentable("null".to_string()));
            }
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().ok_or_else(|| {
                    SerializationError::Unrepresentable(format!("number {}", n))
                })?),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(
                items.into_iter().map(Value::from_json).collect::<Result<Vec<_>, _>>()?,
            ),
            serde_json::Value::Object(object) => {
                let mut entries = BTreeMap::new();
                for (key, value) in object {
                    entries.insert(key, Value::from_json(value)?);
                }
                Value::Map(entries)
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            other => match other.to_json() {
                Ok(json) => write!(f, "{}", json),
                Err(_) => write!(f, "<{}>", other.type_name()),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}
