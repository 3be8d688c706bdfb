//! Query Filters
//!
//! A filter is a JSON object whose keys are dot-separated field paths.
//! A literal value matches by equality; an object made only of `$`-keys
//! is a set of comparisons, all of which must hold:
//!
//! ```json
//! { "artist": "Joni", "year": { "$gte": 1970, "$lt": 1980 } }
//! ```

use crate::domain::errors::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

const OPERATORS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in"];

/// Range/equality filter over stored documents. `{}` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    /// Filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from a JSON value. `null` is treated as `{}`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Null => Ok(Self::all()),
            Value::Object(map) => {
                let filter = Self(map);
                filter.validate()?;
                Ok(filter)
            }
            other => Err(StoreError::InvalidFilter(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Add an equality condition.
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(path.into(), value.into());
        self
    }

    /// Add a comparison condition (`op` is one of `$gt`, `$lte`, ...).
    pub fn cmp(mut self, path: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let path = path.into();
        let condition = self
            .0
            .entry(path)
            .or_insert_with(|| Value::Object(Map::new()));
        if !is_operator_object(condition) {
            *condition = Value::Object(Map::new());
        }
        if let Value::Object(ops) = condition {
            ops.insert(op.to_string(), value.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject unknown operators and malformed `$in` arguments.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (path, condition) in &self.0 {
            if !is_operator_object(condition) {
                continue;
            }
            if let Value::Object(ops) = condition {
                for (op, arg) in ops {
                    if !OPERATORS.contains(&op.as_str()) {
                        return Err(StoreError::InvalidFilter(format!(
                            "unknown operator {} on {}",
                            op, path
                        )));
                    }
                    if op == "$in" && !arg.is_array() {
                        return Err(StoreError::InvalidFilter(format!(
                            "$in on {} expects an array",
                            path
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, document: &Value) -> bool {
        self.0.iter().all(|(path, condition)| {
            let actual = lookup(document, path);
            if is_operator_object(condition) {
                match condition {
                    Value::Object(ops) => ops.iter().all(|(op, arg)| evaluate(op, actual, arg)),
                    _ => false,
                }
            } else {
                actual == Some(condition)
            }
        })
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn evaluate(op: &str, actual: Option<&Value>, arg: &Value) -> bool {
    match op {
        "$eq" => actual == Some(arg),
        "$ne" => actual != Some(arg),
        "$gt" => compare(actual, arg) == Some(Ordering::Greater),
        "$gte" => matches!(compare(actual, arg), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(actual, arg) == Some(Ordering::Less),
        "$lte" => matches!(compare(actual, arg), Some(Ordering::Less | Ordering::Equal)),
        "$in" => match (actual, arg) {
            (Some(value), Value::Array(candidates)) => candidates.contains(value),
            _ => false,
        },
        _ => false,
    }
}

// Only numbers with numbers and strings with strings are ordered.
fn compare(actual: Option<&Value>, arg: &Value) -> Option<Ordering> {
    match (actual?, arg) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
