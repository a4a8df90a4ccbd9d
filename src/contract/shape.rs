//! Default JSON-shape contracts
//!
//! A shape is a small JSON document:
//!
//! ```text
//! {"type": "string"}
//! {"type": "array", "items": {"type": "integer"}}
//! {"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}
//! {"type": ["string", "null"]}
//! {"type": "any"}
//! ```
//!
//! Objects accept keys beyond `properties`; `integer` is a stricter
//! `number`.

use super::traits::{ContractError, ContractInferrer, ContractValidator, ValidationOutcome};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Infers and validates JSON-shape contracts
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeContracts;

impl ShapeContracts {
    pub fn new() -> Self {
        Self
    }

    /// Shape of a sample value
    pub fn infer_shape(sample: &Value) -> Value {
        match sample {
            Value::Null => json!({"type": "null"}),
            Value::Bool(_) => json!({"type": "boolean"}),
            Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
            Value::Number(_) => json!({"type": "number"}),
            Value::String(_) => json!({"type": "string"}),
            Value::Array(items) => {
                let mut shapes: Vec<Value> = Vec::new();
                for shape in items.iter().map(Self::infer_shape) {
                    if !shapes.contains(&shape) {
                        shapes.push(shape);
                    }
                }
                json!({"type": "array", "items": merge_item_shapes(shapes)})
            }
            Value::Object(map) => {
                let properties: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::infer_shape(v)))
                    .collect();
                let required: Vec<&String> = map.keys().collect();
                json!({"type": "object", "properties": properties, "required": required})
            }
        }
    }

    /// Check `value` against `shape`.
    ///
    /// `Ok(Some(reason))` is a mismatch, `Err` a malformed shape.
    pub fn check(shape: &Value, value: &Value) -> Result<Option<String>, ContractError> {
        check_at("$", shape, value)
    }
}

/// One shape for all array elements: the common shape, a nullable scalar
/// union, or `any`
fn merge_item_shapes(mut shapes: Vec<Value>) -> Value {
    let null = json!({"type": "null"});
    match shapes.len() {
        0 => json!({"type": "any"}),
        1 => shapes.remove(0),
        2 if shapes.contains(&null) => {
            let other = shapes.into_iter().find(|s| *s != null).unwrap_or_default();
            match other.get("type").and_then(Value::as_str) {
                Some(t) if !matches!(t, "object" | "array") => json!({"type": [t, "null"]}),
                _ => json!({"type": "any"}),
            }
        }
        _ => json!({"type": "any"}),
    }
}

fn type_names(shape: &Value) -> Result<Vec<&str>, ContractError> {
    let Some(obj) = shape.as_object() else {
        return Err(ContractError::Malformed(format!("shape must be an object, got {}", shape)));
    };
    match obj.get("type") {
        None => Ok(vec!["any"]),
        Some(Value::String(t)) => Ok(vec![t.as_str()]),
        Some(Value::Array(ts)) => ts
            .iter()
            .map(|t| {
                t.as_str()
                    .ok_or_else(|| ContractError::Malformed(format!("type entry {} is not a string", t)))
            })
            .collect(),
        Some(other) => Err(ContractError::Malformed(format!("unsupported type field {}", other))),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_at(path: &str, shape: &Value, value: &Value) -> Result<Option<String>, ContractError> {
    let names = type_names(shape)?;
    let actual = value_type(value);

    let matched = names.iter().find(|name| match **name {
        "any" => true,
        "number" => actual == "number" || actual == "integer",
        other => other == actual,
    });
    let Some(matched) = matched else {
        return Ok(Some(format!(
            "{}: expected {}, found {}",
            path,
            names.join(" | "),
            actual
        )));
    };

    match (*matched, value) {
        ("array", Value::Array(items)) => {
            if let Some(items_shape) = shape.get("items") {
                for (i, item) in items.iter().enumerate() {
                    if let Some(reason) = check_at(&format!("{}[{}]", path, i), items_shape, item)? {
                        return Ok(Some(reason));
                    }
                }
            }
            Ok(None)
        }
        ("object", Value::Object(map)) => {
            if let Some(required) = shape.get("required").and_then(Value::as_array) {
                for key in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(key) {
                        return Ok(Some(format!("{}: missing required key '{}'", path, key)));
                    }
                }
            }
            if let Some(properties) = shape.get("properties").and_then(Value::as_object) {
                for (key, prop_shape) in properties {
                    if let Some(v) = map.get(key) {
                        if let Some(reason) = check_at(&format!("{}.{}", path, key), prop_shape, v)? {
                            return Ok(Some(reason));
                        }
                    }
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ContractValidator for ShapeContracts {
    async fn validate(&self, contract: &Value, value: &Value) -> ValidationOutcome {
        match Self::check(contract, value) {
            Ok(None) => ValidationOutcome::Valid,
            Ok(Some(reason)) => ValidationOutcome::Invalid(reason),
            Err(e) => ValidationOutcome::Error(e.to_string()),
        }
    }
}

#[async_trait]
impl ContractInferrer for ShapeContracts {
    async fn infer(&self, sample: &Value) -> Result<Value, ContractError> {
        Ok(Self::infer_shape(sample))
    }
}
