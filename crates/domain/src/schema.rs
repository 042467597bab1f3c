//! Tool parameter schema conversion.
//!
//! Customer tools declare parameters in one of three forms; this module
//! normalizes all three to a single JSON Schema object, the one internal
//! `ToolSchema` shape used everywhere downstream (the orchestrator, the LLM
//! client body builder, and the sandbox's argument validation all consume
//! this, never the original customer-declared shape).

use serde_json::{Map, Value};

/// Convert a customer tool-parameter declaration to a JSON Schema object.
///
/// Accepted forms:
/// 1. Simple: `{field: "string" | "number" | "boolean"}`, `?` suffix on the
///    field name marks it optional.
/// 2. Extended: `{field: {type, description?, enum?}}`, `?` suffix on
///    `type` marks the field optional.
/// 3. Raw JSON Schema: detected when the root object itself has a `type`
///    key — returned unchanged.
pub fn to_json_schema(declared: &Value) -> Value {
    let Some(obj) = declared.as_object() else {
        return Value::Object(Map::new());
    };

    // Form 3: already a JSON Schema object.
    if obj.contains_key("type") {
        return declared.clone();
    }

    let mut properties = Map::new();
    let mut required = Vec::new();

    for (field, decl) in obj {
        let (name, optional) = split_optional_suffix(field);
        let (schema, field_optional) = field_to_schema(decl);
        properties.insert(name.to_string(), schema);
        if !optional && !field_optional {
            required.push(Value::String(name.to_string()));
        }
    }

    let mut root = Map::new();
    root.insert("type".into(), Value::String("object".into()));
    root.insert("properties".into(), Value::Object(properties));
    root.insert("required".into(), Value::Array(required));
    Value::Object(root)
}

fn split_optional_suffix(field: &str) -> (&str, bool) {
    match field.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (field, false),
    }
}

/// Returns (property schema, whether the declaration itself marked optional
/// via a `?` suffix on its `type` string — only form 2 can do this).
fn field_to_schema(decl: &Value) -> (Value, bool) {
    match decl {
        // Form 1: `"string"`, `"number"?`, etc.
        Value::String(ty) => {
            let (ty, optional) = split_optional_suffix(ty);
            (simple_property(ty, None, None), optional)
        }
        // Form 2: `{type, description?, enum?}`.
        Value::Object(fields) => {
            let ty_raw = fields.get("type").and_then(Value::as_str).unwrap_or("string");
            let (ty, optional) = split_optional_suffix(ty_raw);
            let description = fields.get("description").and_then(Value::as_str);
            let enum_values = fields.get("enum").and_then(Value::as_array);
            (simple_property(ty, description, enum_values), optional)
        }
        other => (other.clone(), false),
    }
}

fn simple_property(ty: &str, description: Option<&str>, enum_values: Option<&Vec<Value>>) -> Value {
    let mut prop = Map::new();
    prop.insert("type".into(), Value::String(ty.to_string()));
    if let Some(d) = description {
        prop.insert("description".into(), Value::String(d.to_string()));
    }
    if let Some(e) = enum_values {
        prop.insert("enum".into(), Value::Array(e.clone()));
    }
    Value::Object(prop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_form_required_field() {
        let schema = to_json_schema(&json!({"city": "string"}));
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn simple_form_optional_field() {
        let schema = to_json_schema(&json!({"city?": "string"}));
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn extended_form_with_description_and_enum() {
        let schema = to_json_schema(&json!({
            "unit": {"type": "string?", "description": "measurement unit", "enum": ["c", "f"]}
        }));
        assert_eq!(schema["properties"]["unit"]["type"], "string");
        assert_eq!(schema["properties"]["unit"]["description"], "measurement unit");
        assert_eq!(schema["properties"]["unit"]["enum"], json!(["c", "f"]));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn raw_json_schema_passthrough() {
        let raw = json!({"type": "object", "properties": {"x": {"type": "number"}}, "required": ["x"]});
        let schema = to_json_schema(&raw);
        assert_eq!(schema, raw);
    }

    #[test]
    fn mixed_required_and_optional_fields() {
        let schema = to_json_schema(&json!({"city": "string", "unit?": "string"}));
        assert_eq!(schema["required"], json!(["city"]));
    }
}
