//! Per-run variable store
//!
//! Holds the variables for a single execution, the step output capture
//! bindings, and `${name}` substitution into step params.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

use super::expressions::ExpressionError;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([^}]+?)\s*\}").unwrap());

/// Variables for one run. Never shared between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableStore {
    /// name -> value
    pub variables: HashMap<String, Value>,

    /// step id -> variable name
    pub output_captures: HashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded from a caller context
    pub fn from_context(context: &Map<String, Value>) -> Self {
        let mut store = Self::new();
        store.merge(context);
        store
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn merge(&mut self, values: &Map<String, Value>) {
        for (key, value) in values {
            self.variables.insert(key.clone(), value.clone());
        }
    }

    /// Bind a step's result to a variable name
    pub fn bind_capture(&mut self, step_id: &str, variable: &str) {
        self.output_captures
            .insert(step_id.to_string(), variable.to_string());
    }

    pub fn capture_for(&self, step_id: &str) -> Option<&str> {
        self.output_captures.get(step_id).map(|s| s.as_str())
    }

    /// Write a step's result into its bound variable, if any.
    /// Returns the variable name written.
    pub fn capture(&mut self, step_id: &str, result: &Value) -> Option<String> {
        let variable = self.output_captures.get(step_id)?.clone();
        self.variables.insert(variable.clone(), result.clone());
        Some(variable)
    }

    /// Resolve a dotted path such as `order.items.0.sku`
    pub fn lookup(&self, path: &str) -> Result<&Value, ExpressionError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        let mut current = self
            .variables
            .get(root)
            .ok_or_else(|| ExpressionError::UnknownVariable(path.to_string()))?;

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| ExpressionError::UnknownVariable(path.to_string()))?;
        }

        Ok(current)
    }

    /// Substitute every `${path}` in a string with the stringified value
    pub fn substitute_str(&self, input: &str) -> Result<String, ExpressionError> {
        let mut result = String::with_capacity(input.len());
        let mut last = 0;

        for cap in PLACEHOLDER_REGEX.captures_iter(input) {
            let (Some(full), Some(path)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let value = self.lookup(path.as_str())?;
            result.push_str(&input[last..full.start()]);
            result.push_str(&stringify(value));
            last = full.end();
        }
        result.push_str(&input[last..]);

        Ok(result)
    }

    /// Substitute placeholders through a JSON value, returning a fresh copy.
    ///
    /// A string that is exactly one placeholder takes the variable's value
    /// with its JSON type intact.
    pub fn substitute_value(&self, value: &Value) -> Result<Value, ExpressionError> {
        match value {
            Value::String(s) => {
                if let Some(path) = whole_placeholder(s) {
                    return self.lookup(path).cloned();
                }
                Ok(Value::String(self.substitute_str(s)?))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.substitute_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => self.substitute_params(map).map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    /// Substitute placeholders in a params object
    pub fn substitute_params(
        &self,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ExpressionError> {
        let mut result = Map::new();
        for (key, value) in params {
            result.insert(key.clone(), self.substitute_value(value)?);
        }
        Ok(result)
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let cap = PLACEHOLDER_REGEX.captures(s)?;
    let full = cap.get(0)?;
    if full.start() == 0 && full.end() == s.len() {
        cap.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Render a value for embedding in a string; strings are not quoted
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
