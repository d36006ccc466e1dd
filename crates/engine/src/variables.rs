//! # Variable Environment
//!
//! A mutable, insertion-ordered mapping of variable names to JSON values, plus the
//! `${name}` textual substitution used for action targets, payloads, and conditions.
//!
//! Substitution never fails: an undefined name renders as an empty string so that
//! condition strings stay evaluable in partially configured runs.
//!
//! ```rust
//! use stepwise_engine::variables::VariableEnvironment;
//! use serde_json::json;
//!
//! let mut variables = VariableEnvironment::new();
//! variables.set("x", json!(1));
//! assert_eq!(variables.substitute("${x} and ${y}"), "1 and ");
//! ```

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::errors::EngineError;

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\s*([^{}]*?)\s*\}").expect("placeholder regex should compile"));

/// Named values visible to substitution and conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableEnvironment {
    values: IndexMap<String, Value>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns the value of `name`, or `default` when it is not defined.
    pub fn get(&self, name: &str, default: Value) -> Value {
        self.values.get(name).cloned().unwrap_or(default)
    }

    /// Borrows the value of `name` without cloning.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Read-only view of all variables in insertion order.
    pub fn as_map(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Adds `amount` to the numeric value of `name` and returns the new value.
    ///
    /// An absent variable starts at `0`. Numbers and numeric strings are accepted;
    /// anything else fails with [`EngineError::VariableType`] and leaves the variable
    /// untouched. Integer plus integer stays integral.
    pub fn increment(&mut self, name: &str, amount: &Value) -> Result<Value, EngineError> {
        let amount = Numeric::from_value(amount).ok_or_else(|| EngineError::VariableType {
            name: name.to_string(),
            found: format!("increment amount {}", describe(amount)),
        })?;
        let current = match self.values.get(name) {
            None => Numeric::Int(0),
            Some(value) => Numeric::from_value(value).ok_or_else(|| EngineError::VariableType {
                name: name.to_string(),
                found: describe(value),
            })?,
        };

        let next = current.add(amount).into_value().ok_or_else(|| EngineError::VariableType {
            name: name.to_string(),
            found: "a non-finite result".to_string(),
        })?;
        self.values.insert(name.to_string(), next.clone());
        Ok(next)
    }

    /// Replaces every `${name}` in `text` with the string form of the variable.
    ///
    /// Undefined names become empty strings. `${name.path}` walks into object and array
    /// values when `name.path` itself is not a defined variable.
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        PLACEHOLDER_REGEX
            .replace_all(text, |captures: &Captures| {
                self.resolve(&captures[1]).map(format_value).unwrap_or_default()
            })
            .into_owned()
    }

    /// Substitutes every string inside a JSON value, recursively.
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.substitute(text)),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.substitute_value(item)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, nested)| (key.clone(), self.substitute_value(nested)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve(&self, reference: &str) -> Option<&Value> {
        if reference.is_empty() {
            return None;
        }
        if let Some(value) = self.values.get(reference) {
            return Some(value);
        }

        let mut segments = reference.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl FromIterator<(String, Value)> for VariableEnvironment {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Formats a JSON value the way substitution renders it.
///
/// Strings are inserted raw, `null` renders empty, and arrays/objects render as compact JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => format!("string \"{text}\""),
        Value::Null => "null".to_string(),
        Value::Bool(flag) => format!("boolean {flag}"),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
        Value::Number(number) => number.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::Float)),
            Value::String(text) => {
                let trimmed = text.trim();
                if let Ok(integer) = trimmed.parse::<i64>() {
                    return Some(Self::Int(integer));
                }
                trimmed.parse::<f64>().ok().filter(|float| float.is_finite()).map(Self::Float)
            }
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(integer) => integer as f64,
            Self::Float(float) => float,
        }
    }

    fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => left
                .checked_add(right)
                .map(Self::Int)
                .unwrap_or_else(|| Self::Float(left as f64 + right as f64)),
            (left, right) => Self::Float(left.as_f64() + right.as_f64()),
        }
    }

    fn into_value(self) -> Option<Value> {
        match self {
            Self::Int(integer) => Some(Value::from(integer)),
            Self::Float(float) => Number::from_f64(float).map(Value::Number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitute_renders_missing_variables_as_empty() {
        let mut variables = VariableEnvironment::new();
        variables.set("x", json!(1));
        assert_eq!(variables.substitute("${x} and ${y}"), "1 and ");
    }

    #[test]
    fn substitute_formats_each_value_type() {
        let mut variables = VariableEnvironment::new();
        variables.set("name", json!("demo"));
        variables.set("flag", json!(true));
        variables.set("nothing", Value::Null);
        variables.set("list", json!([1, 2]));
        assert_eq!(
            variables.substitute("${name}|${flag}|${nothing}|${list}|${ name }"),
            "demo|true||[1,2]|demo"
        );
    }

    #[test]
    fn substitute_walks_nested_paths() {
        let mut variables = VariableEnvironment::new();
        variables.set("user", json!({"profile": {"name": "Ada"}, "roles": ["admin", "dev"]}));
        assert_eq!(variables.substitute("${user.profile.name}"), "Ada");
        assert_eq!(variables.substitute("${user.roles.1}"), "dev");
        assert_eq!(variables.substitute("${user.missing.name}"), "");
    }

    #[test]
    fn substitute_prefers_exact_dotted_names() {
        let mut variables = VariableEnvironment::new();
        variables.set("page.title", json!("exact"));
        variables.set("page", json!({"title": "nested"}));
        assert_eq!(variables.substitute("${page.title}"), "exact");
    }

    #[test]
    fn substitute_preserves_unclosed_placeholders() {
        let variables = VariableEnvironment::new();
        assert_eq!(variables.substitute("value: ${name"), "value: ${name");
        assert_eq!(variables.substitute("no placeholders"), "no placeholders");
    }

    #[test]
    fn substitute_value_recurses_into_payloads() {
        let mut variables = VariableEnvironment::new();
        variables.set("file", json!("report.pdf"));
        let payload = json!({"path": "/tmp/${file}", "tags": ["${file}", 3]});
        assert_eq!(
            variables.substitute_value(&payload),
            json!({"path": "/tmp/report.pdf", "tags": ["report.pdf", 3]})
        );
    }

    #[test]
    fn increment_initializes_absent_variables() {
        let mut variables = VariableEnvironment::new();
        assert_eq!(variables.increment("count", &json!(5)).unwrap(), json!(5));
        assert_eq!(variables.get("count", Value::Null), json!(5));
    }

    #[test]
    fn increment_keeps_integers_integral_and_accepts_numeric_strings() {
        let mut variables = VariableEnvironment::new();
        variables.set("total", json!("2"));
        assert_eq!(variables.increment("total", &json!(1)).unwrap(), json!(3));
        assert_eq!(variables.increment("total", &json!(0.5)).unwrap(), json!(3.5));
    }

    #[test]
    fn increment_rejects_non_numeric_values() {
        let mut variables = VariableEnvironment::new();
        variables.set("label", json!("abc"));
        let error = variables.increment("label", &json!(1)).expect_err("expected type error");
        assert!(matches!(error, EngineError::VariableType { ref name, .. } if name == "label"));
        assert_eq!(variables.get("label", Value::Null), json!("abc"));

        let error = variables.increment("count", &json!("many")).expect_err("expected amount error");
        assert!(matches!(error, EngineError::VariableType { .. }));
        assert!(!variables.contains("count"));
    }

    #[test]
    fn get_returns_default_when_missing() {
        let variables = VariableEnvironment::new();
        assert_eq!(variables.get("missing", json!("fallback")), json!("fallback"));
    }
}
