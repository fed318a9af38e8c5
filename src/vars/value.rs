//! Variable Values
//!
//! A variable value is either a single string or an ordered sequence of
//! strings. JSON configuration maps onto this directly: a string field
//! deserialises to `Single`, an array of strings to `Multi`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single- or multi-valued variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Single(String),
    Multi(Vec<String>),
}

impl Value {
    /// True for the sequence arm, regardless of length.
    pub fn is_multi(&self) -> bool {
        matches!(self, Value::Multi(_))
    }

    /// The values as a slice; a single value is a one-element slice.
    pub fn values(&self) -> &[String] {
        match self {
            Value::Single(s) => std::slice::from_ref(s),
            Value::Multi(v) => v.as_slice(),
        }
    }

    /// Consume into a vector of values.
    pub fn into_values(self) -> Vec<String> {
        match self {
            Value::Single(s) => vec![s],
            Value::Multi(v) => v,
        }
    }

    /// Space-join the values into one string.
    pub fn join(&self) -> String {
        self.values().join(" ")
    }

    /// The single value, or `None` for the sequence arm.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Value::Single(s) => Some(s),
            Value::Multi(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Single(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Single(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Multi(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join())
    }
}

// ============================================================================
// Tests
// ============================================================================
