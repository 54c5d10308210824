//! Property schema validator
//!
//! Turns a piece's declared [`PropertyMap`] into a JSON Schema and checks a
//! step input against it. Rules are keyed purely on [`PropertyType`]; no piece
//! is special-cased.
//!
//! Step inputs are authored in the builder and routinely hold unresolved
//! `{{step_1.output}}` templates, so every structured type also accepts a
//! string. A NUMBER prop given `"{{step_1.total}}"` is valid; given `{}` it
//! is not.

use crate::model::{PieceProperty, PropertyMap, PropertyType};
use serde_json::{Map, Value, json};

/// JSON Schema accepted by a single declared prop
pub fn property_schema(prop: &PieceProperty) -> Value {
    let required = prop.required;
    let types = |names: &[&str]| -> Value {
        let mut names: Vec<&str> = names.to_vec();
        if !required {
            names.push("null");
        }
        json!({ "type": names })
    };

    match prop.property_type {
        PropertyType::Markdown | PropertyType::Unknown => json!({}),
        PropertyType::ShortText
        | PropertyType::LongText
        | PropertyType::DateTime
        | PropertyType::File
        | PropertyType::Color => {
            if required {
                json!({ "type": "string", "minLength": 1 })
            } else {
                types(&["string"])
            }
        }
        PropertyType::Number => types(&["number", "string"]),
        PropertyType::Checkbox => types(&["boolean", "string"]),
        PropertyType::Array => {
            let mut schema = types(&["array", "string"]);
            if let Some(item_props) = &prop.properties {
                schema["items"] = json!({
                    "anyOf": [object_schema(item_props), { "type": "string" }]
                });
            }
            schema
        }
        PropertyType::Object | PropertyType::Dynamic => types(&["object", "string"]),
        PropertyType::Json => types(&["object", "array", "string"]),
        PropertyType::Dropdown | PropertyType::StaticDropdown => {
            if required {
                json!({ "not": { "type": "null" } })
            } else {
                json!({})
            }
        }
        PropertyType::MultiSelectDropdown | PropertyType::StaticMultiSelectDropdown => {
            types(&["array", "string"])
        }
        PropertyType::SecretText
        | PropertyType::Oauth2
        | PropertyType::BasicAuth
        | PropertyType::CustomAuth => {
            if required {
                json!({ "type": "string", "minLength": 1 })
            } else {
                types(&["string"])
            }
        }
    }
}

/// JSON Schema of an input object declared by `props`
pub fn object_schema(props: &PropertyMap) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (name, prop) in props {
        if prop.property_type == PropertyType::Markdown {
            continue;
        }
        properties.insert(name.clone(), property_schema(prop));
        if prop.required {
            required.push(Value::String(name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Check `input` against an already built schema
///
/// A schema that fails to compile counts as a failed check.
pub fn validate_against(schema: &Value, input: &Value) -> bool {
    match jsonschema::validator_for(schema) {
        Ok(validator) => validator.is_valid(input),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compile property schema");
            false
        }
    }
}

/// Whether `input` satisfies every declared prop
pub fn validate_props(props: &PropertyMap, input: &Map<String, Value>) -> bool {
    let schema = object_schema(props);
    let valid = validate_against(&schema, &Value::Object(input.clone()));
    if !valid {
        tracing::debug!(props = props.len(), "Step input failed property validation");
    }
    valid
}
