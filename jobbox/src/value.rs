//! Handler value tree and IPC sanitization.
//!
//! Handlers return a [`JobValue`] — a value tree that, unlike
//! `serde_json::Value`, can carry non-finite floats and non-string map
//! keys. [`sanitize`] reduces such a tree to the restricted JSON domain
//! the wire accepts, dropping what cannot be represented instead of
//! failing.

use serde_json::{Map, Number, Value};

/// A value produced by handler code, before IPC sanitization.
///
/// Maps are ordered key/value pairs with unrestricted keys; only entries
/// whose key is [`JobValue::Str`] survive sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum JobValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<JobValue>),
    Map(Vec<(JobValue, JobValue)>),
}

impl JobValue {
    /// Convenience constructor for a map with string keys.
    pub fn object<K, V, I>(entries: I) -> JobValue
    where
        K: Into<String>,
        V: Into<JobValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        JobValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (JobValue::Str(k.into()), v.into()))
                .collect(),
        )
    }
}

impl From<bool> for JobValue {
    fn from(value: bool) -> Self {
        JobValue::Bool(value)
    }
}

impl From<i64> for JobValue {
    fn from(value: i64) -> Self {
        JobValue::Int(value)
    }
}

impl From<i32> for JobValue {
    fn from(value: i32) -> Self {
        JobValue::Int(value as i64)
    }
}

impl From<f64> for JobValue {
    fn from(value: f64) -> Self {
        JobValue::Float(value)
    }
}

impl From<&str> for JobValue {
    fn from(value: &str) -> Self {
        JobValue::Str(value.to_string())
    }
}

impl From<String> for JobValue {
    fn from(value: String) -> Self {
        JobValue::Str(value)
    }
}

impl<T: Into<JobValue>> From<Vec<T>> for JobValue {
    fn from(values: Vec<T>) -> Self {
        JobValue::Seq(values.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for JobValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => JobValue::Null,
            Value::Bool(b) => JobValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    JobValue::Int(i)
                } else {
                    JobValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => JobValue::Str(s),
            Value::Array(items) => JobValue::Seq(items.into_iter().map(Into::into).collect()),
            Value::Object(entries) => JobValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (JobValue::Str(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Reduce a handler value tree to the restricted JSON domain.
///
/// Returns `None` when the value itself is unrepresentable (a non-finite
/// float). Containers never fail: unsupported elements are dropped, map
/// entries with non-string keys or unsupported values are dropped.
pub fn sanitize(value: &JobValue) -> Option<Value> {
    match value {
        JobValue::Null => Some(Value::Null),
        JobValue::Bool(b) => Some(Value::Bool(*b)),
        JobValue::Int(i) => Some(Value::Number(Number::from(*i))),
        JobValue::Float(f) => Number::from_f64(*f).map(Value::Number),
        JobValue::Str(s) => Some(Value::String(s.clone())),
        JobValue::Seq(items) => Some(Value::Array(items.iter().filter_map(sanitize).collect())),
        JobValue::Map(entries) => {
            let mut object = Map::new();
            for (key, entry) in entries {
                let JobValue::Str(key) = key else {
                    continue;
                };
                if let Some(converted) = sanitize(entry) {
                    object.insert(key.clone(), converted);
                }
            }
            Some(Value::Object(object))
        }
    }
}

/// Sanitize a handler result for the terminal `result` message: a null or
/// unrepresentable top level becomes an empty object.
pub fn sanitize_result(value: &JobValue) -> Value {
    match sanitize(value) {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(converted) => converted,
    }
}
