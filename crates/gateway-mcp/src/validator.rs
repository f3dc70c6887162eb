//! Argument validation for `invoke`, against a tool's cached input schema.
//!
//! Checks required fields, declared JSON types, and enum membership.
//! Numeric strings are parsed against numeric types; no other coercion is
//! performed. Unknown extra fields pass through untouched.

use gateway_core::{GatewayError, Result};
use serde_json::{Map, Value};

/// Validate `arguments` against `schema`, returning the (possibly
/// numerically coerced) argument object to send downstream.
pub fn validate_arguments(tool_id: &str, schema: &Value, arguments: &Value) -> Result<Value> {
    let args = match arguments {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => {
            return Err(invalid(tool_id, "arguments must be a JSON object"));
        }
    };

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for field in &required {
        if !args.contains_key(*field) {
            return Err(invalid(
                tool_id,
                format!("missing required field '{}'", field),
            ));
        }
    }

    let mut validated = Map::new();
    for (name, value) in args {
        match properties.get(&name) {
            Some(prop) => {
                let checked = check_property(tool_id, &name, prop, value)?;
                validated.insert(name, checked);
            }
            // Unknown extra fields pass through.
            None => {
                validated.insert(name, value);
            }
        }
    }
    Ok(Value::Object(validated))
}

fn check_property(tool_id: &str, name: &str, prop: &Value, value: Value) -> Result<Value> {
    let declared = prop.get("type").and_then(Value::as_str);

    let value = match declared {
        Some("string") if !value.is_string() => {
            return Err(type_mismatch(tool_id, name, "string", &value));
        }
        Some("boolean") if !value.is_boolean() => {
            return Err(type_mismatch(tool_id, name, "boolean", &value));
        }
        Some("array") if !value.is_array() => {
            return Err(type_mismatch(tool_id, name, "array", &value));
        }
        Some("object") if !value.is_object() => {
            return Err(type_mismatch(tool_id, name, "object", &value));
        }
        Some("number") => coerce_number(tool_id, name, value, false)?,
        Some("integer") => coerce_number(tool_id, name, value, true)?,
        _ => value,
    };

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        if !allowed.contains(&value) {
            return Err(invalid(
                tool_id,
                format!("field '{}' must be one of {:?}", name, allowed),
            ));
        }
    }
    Ok(value)
}

/// Numbers stay numbers; numeric strings are parsed explicitly; everything
/// else is a mismatch.
fn coerce_number(tool_id: &str, name: &str, value: Value, integral: bool) -> Result<Value> {
    match &value {
        Value::Number(n) => {
            if integral && n.as_i64().is_none() && n.as_u64().is_none() {
                return Err(type_mismatch(tool_id, name, "integer", &value));
            }
            Ok(value)
        }
        Value::String(text) => {
            if integral {
                text.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| type_mismatch(tool_id, name, "integer", &value))
            } else {
                text.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| type_mismatch(tool_id, name, "number", &value))
            }
        }
        _ => Err(type_mismatch(
            tool_id,
            name,
            if integral { "integer" } else { "number" },
            &value,
        )),
    }
}

fn invalid(tool_id: &str, reason: impl Into<String>) -> GatewayError {
    GatewayError::InvalidArgument {
        tool_id: tool_id.to_string(),
        reason: reason.into(),
    }
}

fn type_mismatch(tool_id: &str, field: &str, expected: &str, got: &Value) -> GatewayError {
    let got_type = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    invalid(
        tool_id,
        format!("field '{}' expects {}, got {}", field, expected, got_type),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "mode": {"type": "string", "enum": ["fast", "slow"]},
            },
            "required": ["name"],
        })
    }

    #[test]
    fn test_valid_arguments_pass() {
        let out = validate_arguments(
            "s::t",
            &schema(),
            &json!({"name": "world", "count": 3, "mode": "fast"}),
        )
        .unwrap();
        assert_eq!(out["name"], json!("world"));
        assert_eq!(out["count"], json!(3));
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate_arguments("s::t", &schema(), &json!({"count": 3})).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err =
            validate_arguments("s::t", &schema(), &json!({"name": 42})).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_numeric_string_coerced() {
        let out = validate_arguments(
            "s::t",
            &schema(),
            &json!({"name": "x", "count": "17", "ratio": "2.5"}),
        )
        .unwrap();
        assert_eq!(out["count"], json!(17));
        assert_eq!(out["ratio"], json!(2.5));
    }

    #[test]
    fn test_non_numeric_string_not_coerced() {
        let err = validate_arguments("s::t", &schema(), &json!({"name": "x", "count": "lots"}))
            .unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn test_enum_membership() {
        let err = validate_arguments("s::t", &schema(), &json!({"name": "x", "mode": "medium"}))
            .unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_unknown_extras_pass_through() {
        let out = validate_arguments(
            "s::t",
            &schema(),
            &json!({"name": "x", "undocumented": {"nested": true}}),
        )
        .unwrap();
        assert_eq!(out["undocumented"]["nested"], json!(true));
    }

    #[test]
    fn test_null_arguments_require_fields() {
        let err = validate_arguments("s::t", &schema(), &Value::Null).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }
}
