use super::props::*;
use crate::model::{PieceProperty, PropertyMap, PropertyType};
use serde_json::{Map, Value, json};

fn props(entries: &[(&str, PropertyType, bool)]) -> PropertyMap {
    entries
        .iter()
        .map(|(name, ty, required)| (name.to_string(), PieceProperty::new(name, *ty, *required)))
        .collect()
}

fn input(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_number_accepts_templates_not_objects() {
    let props = props(&[("amount", PropertyType::Number, true)]);
    assert!(validate_props(&props, &input(json!({ "amount": 42 }))));
    assert!(validate_props(&props, &input(json!({ "amount": "{{step1.output}}" }))));
    assert!(!validate_props(&props, &input(json!({ "amount": {} }))));
    assert!(!validate_props(&props, &input(json!({}))));
}

#[test]
fn test_checkbox_accepts_bool_or_string() {
    let props = props(&[("notify", PropertyType::Checkbox, false)]);
    assert!(validate_props(&props, &input(json!({ "notify": true }))));
    assert!(validate_props(&props, &input(json!({ "notify": "{{trigger.flag}}" }))));
    assert!(validate_props(&props, &input(json!({ "notify": null }))));
    assert!(validate_props(&props, &input(json!({}))));
    assert!(!validate_props(&props, &input(json!({ "notify": 1 }))));
}

#[test]
fn test_required_text_must_be_non_empty() {
    let props = props(&[("channel", PropertyType::ShortText, true)]);
    assert!(validate_props(&props, &input(json!({ "channel": "general" }))));
    assert!(!validate_props(&props, &input(json!({ "channel": "" }))));
    assert!(!validate_props(&props, &input(json!({ "channel": null }))));
}

#[test]
fn test_structured_types_accept_strings() {
    let props = props(&[
        ("rows", PropertyType::Array, true),
        ("payload", PropertyType::Object, true),
        ("body", PropertyType::Json, true),
        ("extra", PropertyType::Dynamic, true),
        ("tags", PropertyType::MultiSelectDropdown, true),
    ]);
    assert!(validate_props(
        &props,
        &input(json!({
            "rows": [1, 2],
            "payload": { "a": 1 },
            "body": [1],
            "extra": {},
            "tags": ["a"]
        }))
    ));
    assert!(validate_props(
        &props,
        &input(json!({
            "rows": "{{step_1.rows}}",
            "payload": "{{step_1.payload}}",
            "body": "{{step_1.body}}",
            "extra": "{{step_1.extra}}",
            "tags": "{{step_1.tags}}"
        }))
    ));
    assert!(!validate_props(
        &props,
        &input(json!({ "rows": 1, "payload": {}, "body": {}, "extra": {}, "tags": [] }))
    ));
}

#[test]
fn test_auth_types_accept_connection_references() {
    let props = props(&[("auth", PropertyType::Oauth2, true)]);
    assert!(validate_props(&props, &input(json!({ "auth": "{{connections['slack']}}" }))));
    assert!(validate_props(&props, &input(json!({ "auth": "xoxb-literal" }))));
    assert!(!validate_props(&props, &input(json!({}))));
    assert!(!validate_props(&props, &input(json!({ "auth": 12 }))));
}

#[test]
fn test_markdown_and_unknown_are_ignored() {
    let props = props(&[
        ("note", PropertyType::Markdown, true),
        ("future", PropertyType::Unknown, false),
    ]);
    assert!(validate_props(&props, &input(json!({}))));
    assert!(validate_props(&props, &input(json!({ "future": [1, { "x": true }] }))));
}

#[test]
fn test_dropdown_requires_non_null_value() {
    let props = props(&[("list", PropertyType::Dropdown, true)]);
    assert!(validate_props(&props, &input(json!({ "list": 7 }))));
    assert!(validate_props(&props, &input(json!({ "list": { "id": 7 } }))));
    assert!(!validate_props(&props, &input(json!({ "list": null }))));
}

#[test]
fn test_array_items_follow_nested_properties() {
    let mut rows = PieceProperty::new("Rows", PropertyType::Array, true);
    rows.properties = Some(props(&[("name", PropertyType::ShortText, true)]));
    let mut map = PropertyMap::new();
    map.insert("rows".to_string(), rows);

    assert!(validate_props(&map, &input(json!({ "rows": [{ "name": "a" }, "{{x}}"] }))));
    assert!(!validate_props(&map, &input(json!({ "rows": [{ "name": "" }] }))));
}

#[test]
fn test_uncompilable_schema_is_invalid() {
    let schema = json!({ "type": 12 });
    assert!(!validate_against(&schema, &json!({})));
}
