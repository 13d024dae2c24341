//! Document values
//!
//! Field path resolution, document flattening and the hashable scalar type
//! used as the key of `term` index entries.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A finite `f64` with total ordering and bitwise hashing.
///
/// `-0.0` is folded into `0.0` so that equal numbers hash equally.
#[derive(Clone, Copy, Debug)]
pub struct Number(f64);

impl Number {
    /// Wrap a finite float; NaN and infinities are rejected.
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self(value + 0.0))
    }

    /// The wrapped value.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Number {}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A scalar document value: the unit of `term` equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    /// Read a JSON scalar; null, arrays and objects are not scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().and_then(Number::new).map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Render back to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(n.get())
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Equality against a raw document value, without allocating.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool(a), Value::Bool(b)) => a == b,
            (Self::Number(a), Value::Number(b)) => b.as_f64() == Some(a.get()),
            (Self::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

/// Ordering value of a number or an RFC 3339 date (epoch milliseconds).
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}

/// Apply `test` to a value, or to each element when the value is an array.
pub fn any_element(value: &Value, test: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(test),
        other => test(other),
    }
}

/// Resolve a dotted field path inside a document.
///
/// A literal key containing dots wins over the nested interpretation.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let object = document.as_object()?;
    if let Some(value) = object.get(path) {
        return Some(value);
    }

    let mut current = document;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Flatten a document into `(path, value)` pairs.
///
/// Nested objects contribute both their own path and the paths of their
/// members; arrays are leaves.
pub fn flatten(document: &Value) -> Vec<(String, &Value)> {
    let mut fields = Vec::new();
    if let Some(object) = document.as_object() {
        flatten_into(object, None, &mut fields);
    }
    fields
}

fn flatten_into<'a>(object: &'a Map<String, Value>, prefix: Option<&str>, out: &mut Vec<(String, &'a Value)>) {
    for (key, value) in object {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        if let Value::Object(inner) = value {
            flatten_into(inner, Some(&path), out);
        }
        out.push((path, value));
    }
}
