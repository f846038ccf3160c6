//! Attribute values that can travel inside a session token.
//!
//! The set of kinds is closed: strings, booleans, integers, floats and nested
//! maps of the same. Anything richer has to be flattened by the caller (or
//! go through [`crate::SessionRecord::set_serialized`], which rejects what
//! does not fit).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SessionError};

/// String-keyed attribute map stored in a session.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A single session attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    Map(AttributeMap),
}

impl AttributeValue {
    /// Human-readable kind name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Bool(_) => "boolean",
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&AttributeMap> {
        match self {
            AttributeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Check that the value survives the JSON segment encoding.
    ///
    /// Non-finite floats have no JSON representation and are rejected,
    /// including inside nested maps.
    pub fn validate(&self) -> Result<()> {
        match self {
            AttributeValue::Float(f) if !f.is_finite() => Err(SessionError::Serialization(
                format!("non-finite float {} cannot be stored in a session", f),
            )),
            AttributeValue::Map(map) => map.values().try_for_each(AttributeValue::validate),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Map(m) => write!(f, "{{{} entries}}", m.len()),
        }
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = SessionError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(AttributeValue::String(s)),
            Value::Bool(b) => Ok(AttributeValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(AttributeValue::Integer(i))
                } else if n.is_f64()
                    && let Some(f) = n.as_f64()
                {
                    Ok(AttributeValue::Float(f))
                } else {
                    Err(SessionError::Serialization(format!(
                        "integer {} does not fit in a signed 64-bit attribute",
                        n
                    )))
                }
            }
            Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| AttributeValue::try_from(v).map(|v| (k, v)))
                .collect::<Result<AttributeMap>>()
                .map(AttributeValue::Map),
            Value::Null => Err(SessionError::Serialization(
                "null is not a supported attribute value".to_string(),
            )),
            Value::Array(_) => Err(SessionError::Serialization(
                "arrays are not a supported attribute value".to_string(),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        AttributeValue::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<u32> for AttributeValue {
    fn from(i: u32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<AttributeMap> for AttributeValue {
    fn from(m: AttributeMap) -> Self {
        AttributeValue::Map(m)
    }
}
