//! Value types stored by transactional objects
//!
//! `Value` is the universal payload for object fields and collection
//! entries; `Key` is the hashable subset usable as a keyed-collection key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Universal value type for transactional object state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    // Null
    Null,
    // Boolean
    Bool(bool),
    // Integer
    I64(i64),
    // Float
    F64(f64),
    // String
    Str(String),
    // Raw bytes
    Bytes(Vec<u8>),
    // Collections
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Create a null value
    pub fn null() -> Self {
        Value::Null
    }

    /// Create an I64 value
    pub fn integer(i: i64) -> Self {
        Value::I64(i)
    }

    /// Create an F64 value
    pub fn float(f: f64) -> Self {
        Value::F64(f)
    }

    /// Create a boolean value
    pub fn boolean(b: bool) -> Self {
        Value::Bool(b)
    }

    /// Create a string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    /// Create a bytes value
    pub fn bytes<B: Into<Vec<u8>>>(b: B) -> Self {
        Value::Bytes(b.into())
    }

    /// True for `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "<list of {}>", l.len()),
            Value::Map(m) => write!(f, "<map of {}>", m.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Hashable key type for keyed collections.
///
/// A strict subset of `Value`: floats and nested collections cannot be keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Bool(bool),
    I64(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Key {
    /// Convert a value into a key, if its shape allows it
    pub fn from_value(value: Value) -> Option<Key> {
        match value {
            Value::Bool(b) => Some(Key::Bool(b)),
            Value::I64(i) => Some(Key::I64(i)),
            Value::Str(s) => Some(Key::Str(s)),
            Value::Bytes(b) => Some(Key::Bytes(b)),
            _ => None,
        }
    }

    /// Convert back into a value
    pub fn into_value(self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(b),
            Key::I64(i) => Value::I64(i),
            Key::Str(s) => Value::Str(s),
            Key::Bytes(b) => Value::Bytes(b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::I64(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::I64(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}
