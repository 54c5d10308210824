//! Connection references inside step inputs
//!
//! Connections are addressed by external id. Both template spellings resolve
//! to the same id:
//!
//! - `{{connections.my-slack}}`
//! - `{{connections['my-slack']}}`
//!
//! Anything following the id inside the braces (e.g. `.access_token`) is
//! part of the reference and is removed with it when stripping.

use crate::constants::{AGENT_ID_INPUT, AGENT_PIECE_NAME};
use crate::flow::structure::get_all_steps;
use crate::model::{FlowTrigger, StepInput, StepMut};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

static CONNECTION_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\{\{\s*connections(?:\.([A-Za-z0-9_\-]+)|\[\s*['"]([^'"\]]+)['"]\s*\])[^}]*\}\}"#,
    )
    .expect("Invalid connection reference regex")
});

/// External ids referenced by a single string, in order of appearance
pub fn extract_connection_ids(text: &str) -> Vec<String> {
    CONNECTION_REF
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn contains_connection_ref(text: &str) -> bool {
    CONNECTION_REF.is_match(text)
}

fn collect_from_value(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => out.extend(extract_connection_ids(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_from_value(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_from_value(v, out)),
        _ => {}
    }
}

/// Sorted, de-duplicated connection ids referenced anywhere in the tree
pub fn collect_connection_ids(trigger: &FlowTrigger) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for step in get_all_steps(trigger) {
        if let Some(input) = step.input() {
            input.values().for_each(|v| collect_from_value(v, &mut ids));
        }
    }
    ids.into_iter().collect()
}

/// Sorted, de-duplicated agent ids referenced by agent piece steps
pub fn collect_agent_ids(trigger: &FlowTrigger) -> Vec<String> {
    let ids: BTreeSet<String> = get_all_steps(trigger)
        .into_iter()
        .filter(|step| matches!(step.piece(), Some((name, _)) if name == AGENT_PIECE_NAME))
        .filter_map(|step| step.input()?.get(AGENT_ID_INPUT)?.as_str().map(str::to_string))
        .filter(|id| !id.is_empty())
        .collect();
    ids.into_iter().collect()
}

/// Remove connection references from a value
///
/// Returns `None` when the value was a string that is empty once its
/// references are removed. Object keys holding such strings are dropped,
/// array slots become `null` so positions stay stable.
pub fn strip_value(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if contains_connection_ref(s) => {
            let stripped = CONNECTION_REF.replace_all(s, "");
            if stripped.is_empty() {
                None
            } else {
                Some(Value::String(stripped.into_owned()))
            }
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| strip_value(item).unwrap_or(Value::Null))
                .collect(),
        )),
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| strip_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

pub fn strip_input(input: &StepInput) -> StepInput {
    input
        .iter()
        .filter_map(|(k, v)| strip_value(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Step callback for `transfer_flow` that strips connection references
pub fn strip_step_connections(mut step: StepMut<'_>) {
    if let Some(input) = step.input_mut() {
        *input = strip_input(input);
    }
}

/// Step callback for `transfer_flow` that drops captured sample data
pub fn strip_step_sample_data(mut step: StepMut<'_>) {
    if let Some(ui) = step.input_ui_info_mut() {
        ui.clear_sample_data();
    }
}
