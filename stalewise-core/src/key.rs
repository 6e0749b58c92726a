//! Cache key computation.
//!
//! A computed key is a base key (the resource path) optionally followed by
//! `?` and a canonical query string. Parameters are normalized before
//! encoding: names are sorted, null values are dropped and arrays become
//! repeated names in their given order. Two logically equal parameter sets
//! therefore always produce the same key.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::ParamsError;

/// Canonical query parameters attached to a base key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build parameters from any value serializing to a map (typically a
    /// filters struct). `None` fields are dropped.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ParamsError> {
        let value = serde_json::to_value(value).map_err(|e| ParamsError::Serialize {
            reason: e.to_string(),
        })?;

        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let mut params = Self::new();
                for (name, value) in map {
                    params.push_value(name, value);
                }
                Ok(params)
            }
            other => Err(ParamsError::NotAMap {
                found: value_kind(&other).to_string(),
            }),
        }
    }

    /// Add a single parameter. Appends when the name already exists.
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.pairs
            .entry(name.into())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Add a parameter only when a value is present.
    pub fn with_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.pairs.get(name).map(Vec::as_slice)
    }

    /// Encode as a canonical, percent-encoded query string (without `?`).
    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name, value)))
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn push_value(&mut self, name: String, value: Value) {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                let values: Vec<String> = items.into_iter().filter_map(scalar_to_string).collect();
                if !values.is_empty() {
                    self.pairs.entry(name).or_default().extend(values);
                }
            }
            other => {
                if let Some(value) = scalar_to_string(other) {
                    self.pairs.entry(name).or_default().push(value);
                }
            }
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Nested structures have no canonical query form, keep them as compact JSON
        nested => Some(nested.to_string()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compute the cache key of a base key and optional parameters.
///
/// A base key already carrying an inline query string gets the parameters
/// appended with `&`.
pub fn compute_key(base_key: &str, params: Option<&QueryParams>) -> String {
    match params {
        Some(params) if !params.is_empty() => {
            let separator = if base_key.contains('?') { '&' } else { '?' };
            format!("{}{}{}", base_key, separator, params.encode())
        }
        _ => base_key.to_string(),
    }
}

/// Base key of a raw key or URL: everything before the first `?`.
pub fn base_key_of(key: &str) -> &str {
    key.split_once('?').map_or(key, |(base, _)| base)
}
