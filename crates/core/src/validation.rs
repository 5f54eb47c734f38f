// Tool argument validation
//
// Arguments are checked against the tool's JSON schema. When they fail, the
// configured coercion strategies run in caller order and validation re-runs.
// Strategies only touch top-level properties described by the schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// A single argument repair step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionStrategy {
    /// Replace `null` (or a missing property) with the schema's `default`
    NullToDefault,
    /// Cast strings to numbers/integers/booleans and scalars to strings
    TypeCast,
    /// Parse strings holding a JSON object or array
    JsonParse,
    /// Drop properties whose value is `null`
    StripNull,
}

/// Validates tool arguments, applying coercions in a fixed order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolValidator {
    strategies: Vec<CoercionStrategy>,
}

impl ToolValidator {
    /// Validator with no coercion (strict schema check)
    pub fn strict() -> Self {
        Self::default()
    }

    /// Validator applying `strategies` in the given order
    pub fn with_strategies(strategies: Vec<CoercionStrategy>) -> Self {
        Self { strategies }
    }

    /// Permissive default: defaults for nulls, JSON strings, then casts
    pub fn permissive() -> Self {
        Self::with_strategies(vec![
            CoercionStrategy::NullToDefault,
            CoercionStrategy::JsonParse,
            CoercionStrategy::TypeCast,
        ])
    }

    pub fn strategies(&self) -> &[CoercionStrategy] {
        &self.strategies
    }

    /// Validate `args` for `tool` against `schema`, returning the arguments
    /// the tool should receive
    pub fn validate(&self, tool: &str, args: Value, schema: &Value) -> Result<Value> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            RuntimeError::configuration(format!("Invalid schema for tool '{tool}': {e}"))
        })?;

        if validator.is_valid(&args) {
            return Ok(args);
        }

        let mut coerced = args;
        for strategy in &self.strategies {
            coerced = apply(*strategy, coerced, schema);
        }

        match validator.validate(&coerced) {
            Ok(()) => {
                debug!(tool = %tool, "Tool arguments accepted after coercion");
                Ok(coerced)
            }
            Err(e) => Err(RuntimeError::ToolValidation {
                tool: tool.to_string(),
                message: format!("{} (at '{}')", e, e.instance_path),
            }),
        }
    }
}

fn apply(strategy: CoercionStrategy, input: Value, schema: &Value) -> Value {
    match strategy {
        CoercionStrategy::JsonParse => {
            let Value::Object(obj) = input else {
                return parse_json_string(input);
            };
            Value::Object(obj.into_iter().map(|(k, v)| (k, parse_json_string(v))).collect())
        }
        CoercionStrategy::StripNull => match input {
            Value::Object(obj) => Value::Object(obj.into_iter().filter(|(_, v)| !v.is_null()).collect()),
            other => other,
        },
        CoercionStrategy::NullToDefault => {
            let (Value::Object(mut obj), Some(props)) = (input.clone(), properties(schema)) else {
                return input;
            };
            for (key, prop) in props {
                let Some(default) = prop.get("default") else {
                    continue;
                };
                if obj.get(key).map_or(true, Value::is_null) {
                    obj.insert(key.clone(), default.clone());
                }
            }
            Value::Object(obj)
        }
        CoercionStrategy::TypeCast => {
            let (Value::Object(obj), Some(props)) = (input.clone(), properties(schema)) else {
                return input;
            };
            let cast = obj
                .into_iter()
                .map(|(key, value)| {
                    let target = props.get(&key).and_then(|p| p.get("type")).and_then(Value::as_str);
                    let value = match target {
                        Some(target) => cast_value(value, target),
                        None => value,
                    };
                    (key, value)
                })
                .collect();
            Value::Object(cast)
        }
    }
}

fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn parse_json_string(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    let trimmed = s.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_like_json {
        if let Ok(parsed) = serde_json::from_str(trimmed) {
            return parsed;
        }
    }
    value
}

fn cast_value(value: Value, target: &str) -> Value {
    match (target, &value) {
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value),
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && n.fract() == 0.0)
            .map(|n| Value::from(n as i64))
            .unwrap_or(value),
        ("integer", Value::Number(n)) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::from(f as i64))
            .unwrap_or(value),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => value,
        },
        ("string", Value::Number(n)) => Value::String(n.to_string()),
        ("string", Value::Bool(b)) => Value::String(b.to_string()),
        _ => value,
    }
}
