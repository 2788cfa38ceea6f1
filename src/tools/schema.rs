//! Argument validation against a tool's declared parameter schema
//!
//! Covers the JSON-schema subset tool declarations use: an object with
//! `properties`, `required`, primitive `type`s, `enum`, numeric `minimum`,
//! and `items` for arrays. Unknown keywords are ignored.

use crate::error::AgentError;
use crate::Result;
use serde_json::Value;

pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<()> {
    check_value(tool, "arguments", schema, arguments)
}

fn check_value(tool: &str, field: &str, schema: &Value, value: &Value) -> Result<()> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            return Err(invalid(
                tool,
                field,
                &format!("expected {}, got {}", expected, type_name(value)),
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(invalid(tool, field, &format!("must be one of {}", Value::Array(allowed.clone()))));
        }
    }

    if let (Some(minimum), Some(actual)) = (
        schema.get("minimum").and_then(Value::as_f64),
        value.as_f64(),
    ) {
        if actual < minimum {
            return Err(invalid(tool, field, &format!("must be >= {}", minimum)));
        }
    }

    if let Value::Object(map) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                match map.get(name) {
                    None | Some(Value::Null) => {
                        return Err(invalid(tool, name, "is required"));
                    }
                    _ => {}
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property_schema) in properties {
                if let Some(property) = map.get(name) {
                    if property.is_null() {
                        continue;
                    }
                    check_value(tool, name, property_schema, property)?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check_value(tool, &format!("{}[{}]", field, i), item_schema, item)?;
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(tool: &str, field: &str, message: &str) -> AgentError {
    AgentError::InvalidToolInput(format!("{}: '{}' {}", tool, field, message))
}
