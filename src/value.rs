//! Values stored in the cache
//!
//! `CacheValue` is a JSON-like tree extended with the two shapes plain JSON
//! cannot carry: binary buffers and maps with arbitrary keys. It also has an
//! `Undefined` variant so that "the function returned nothing" can be cached
//! and written to a remote store.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

use crate::CacheError;

/// A value that can be written to any cache layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<CacheValue>),
    Object(BTreeMap<String, CacheValue>),
    /// Binary buffer
    Bytes(Vec<u8>),
    /// Map with arbitrary keys, in insertion order
    Map(Vec<(CacheValue, CacheValue)>),
}

impl CacheValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, CacheValue::Undefined)
    }

    /// Build a value from anything serde can serialize.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Deserialize into a typed value.
    ///
    /// Buffers are presented as arrays of bytes and maps as arrays of
    /// `[key, value]` pairs; `Undefined` is presented as `null`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, CacheError> {
        Ok(serde_json::from_value(self.to_plain_json())?)
    }

    /// Lossy conversion to plain JSON, without the tags used by the codec.
    pub fn to_plain_json(&self) -> Value {
        match self {
            CacheValue::Undefined | CacheValue::Null => Value::Null,
            CacheValue::Bool(b) => Value::Bool(*b),
            CacheValue::Number(n) => Value::Number(n.clone()),
            CacheValue::String(s) => Value::String(s.clone()),
            CacheValue::Array(items) => {
                Value::Array(items.iter().map(CacheValue::to_plain_json).collect())
            }
            CacheValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
            CacheValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
            }
            CacheValue::Map(entries) => Value::Array(
                entries
                    .iter()
                    .map(|(k, v)| Value::Array(vec![k.to_plain_json(), v.to_plain_json()]))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => CacheValue::Null,
            Value::Bool(b) => CacheValue::Bool(b),
            Value::Number(n) => CacheValue::Number(n),
            Value::String(s) => CacheValue::String(s),
            Value::Array(items) => CacheValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(fields) => {
                CacheValue::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::String(s.to_owned())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::String(s)
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        CacheValue::Bool(b)
    }
}

impl From<i64> for CacheValue {
    fn from(n: i64) -> Self {
        CacheValue::Number(n.into())
    }
}

impl From<u64> for CacheValue {
    fn from(n: u64) -> Self {
        CacheValue::Number(n.into())
    }
}

impl From<f64> for CacheValue {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(CacheValue::Null, CacheValue::Number)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(bytes)
    }
}
