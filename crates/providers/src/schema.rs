//! JSON-Schema sanitization for backends that accept only a subset of the
//! standard (Gemini's function declarations in particular).

use serde_json::{Map, Value};

/// Keywords Gemini rejects outright.
const DROPPED_KEYS: &[&str] = &["$schema", "$id", "additionalProperties", "default", "examples"];

/// Rewrite `schema` into the single-type subset:
///
/// - `anyOf` / `oneOf` / `allOf` collapse to their first non-null branch
/// - `type: ["string", "null"]` collapses to the first non-null type
/// - unsupported keywords are dropped
/// - `properties` and `items` are sanitized recursively
pub fn sanitize_schema(schema: &Value) -> Value {
    let Value::Object(obj) = schema else {
        return schema.clone();
    };

    // Union keywords: take the first non-null branch and merge the rest of
    // this object (description etc.) over it.
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(branches)) = obj.get(key) {
            let branch = branches
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) != Some("null"))
                .or_else(|| branches.first());
            let mut merged = match branch.map(sanitize_schema) {
                Some(Value::Object(m)) => m,
                _ => Map::new(),
            };
            for (k, v) in obj {
                if matches!(k.as_str(), "anyOf" | "oneOf" | "allOf") {
                    continue;
                }
                merged.entry(k.clone()).or_insert_with(|| sanitize_value(k, v));
            }
            return sanitize_schema(&Value::Object(merged));
        }
    }

    let mut out = Map::new();
    for (k, v) in obj {
        if DROPPED_KEYS.contains(&k.as_str()) {
            continue;
        }
        out.insert(k.clone(), sanitize_value(k, v));
    }
    Value::Object(out)
}

fn sanitize_value(key: &str, value: &Value) -> Value {
    match key {
        "type" => match value {
            Value::Array(types) => types
                .iter()
                .find(|t| t.as_str() != Some("null"))
                .cloned()
                .unwrap_or_else(|| Value::String("string".into())),
            other => other.clone(),
        },
        "properties" => match value {
            Value::Object(props) => Value::Object(
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                    .collect(),
            ),
            other => other.clone(),
        },
        "items" => sanitize_schema(value),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collapses_type_arrays() {
        let out = sanitize_schema(&json!({"type": ["string", "null"]}));
        assert_eq!(out, json!({"type": "string"}));
    }

    #[test]
    fn flattens_any_of_to_first_non_null_branch() {
        let out = sanitize_schema(&json!({
            "description": "target",
            "anyOf": [{"type": "null"}, {"type": "integer", "minimum": 0}]
        }));
        assert_eq!(
            out,
            json!({"type": "integer", "minimum": 0, "description": "target"})
        );
    }

    #[test]
    fn recurses_into_properties_and_items() {
        let out = sanitize_schema(&json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "tabs": {
                    "type": "array",
                    "items": {"oneOf": [{"type": "string"}, {"type": "number"}]}
                },
                "label": {"type": ["null", "string"], "default": "x"}
            }
        }));
        assert_eq!(
            out,
            json!({
                "type": "object",
                "properties": {
                    "tabs": {"type": "array", "items": {"type": "string"}},
                    "label": {"type": "string"}
                }
            })
        );
    }

    #[test]
    fn non_objects_pass_through() {
        assert_eq!(sanitize_schema(&json!(true)), json!(true));
    }
}
