use std::fmt;

use serde::{Deserialize, Serialize};

pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Observed value of a data item.
///
/// SHDR values are text on the wire; two values are equal when they render
/// the same, so `Number(72.5) == Text("72.5")`. Change ids hash the same
/// rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Unavailable,
    Number(f64),
    Text(String),
}

impl Value {
    /// Reads a wire token. `UNAVAILABLE` (any case) maps to the sentinel.
    /// A token becomes `Number` only when it is the number's own rendering,
    /// so `0001` or `72.50` stay text and print back unchanged.
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case(UNAVAILABLE) {
            return Value::Unavailable;
        }

        match token.parse::<f64>() {
            Ok(n) if n.is_finite() && n.to_string() == token => Value::Number(n),
            _ => Value::Text(token.to_owned()),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Value::Unavailable)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unavailable => f.write_str(UNAVAILABLE),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(text) => f.write_str(text),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unavailable, Value::Unavailable) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}
