// Helper functions for creating tool input schemas

use serde_json::{json, Value};

/// Schema published for tools registered without one: any object is accepted.
pub fn open_object_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    json!({
        "type": "number",
        "description": description
    })
}

pub fn json_schema_boolean(description: &str) -> Value {
    json!({
        "type": "boolean",
        "description": description
    })
}
