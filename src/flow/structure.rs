//! Traversal and structure-preserving transforms over the step tree
//!
//! Traversal order is deterministic: the trigger first, then depth-first
//! through each action, its nested children (loop body, router branches in
//! branch order), and finally its `next_action` chain.
//!
//! Mutating helpers go through `Arc::make_mut`, so only the nodes on the
//! edited path are copied when the tree is shared with another version.

use crate::model::{ActionKind, FlowAction, FlowTrigger, FlowVersion, StepMut, StepRef, StepType};
use crate::{PieceFlowError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Every step reachable from the trigger, trigger first
pub fn get_all_steps(trigger: &FlowTrigger) -> Vec<StepRef<'_>> {
    let mut steps = vec![StepRef::Trigger(trigger)];
    if let Some(next) = &trigger.next_action {
        collect_chain(next, &mut steps);
    }
    steps
}

/// Every action reachable from the trigger
pub fn get_all_actions(trigger: &FlowTrigger) -> Vec<&FlowAction> {
    get_all_steps(trigger)
        .into_iter()
        .filter_map(|step| match step {
            StepRef::Action(action) => Some(action),
            StepRef::Trigger(_) => None,
        })
        .collect()
}

/// The action and everything nested inside it, without its `next_action` chain
pub fn get_nested_steps(action: &FlowAction) -> Vec<&FlowAction> {
    let mut steps = vec![StepRef::Action(action)];
    for child in action.children() {
        collect_chain(child, &mut steps);
    }
    steps
        .into_iter()
        .filter_map(|step| match step {
            StepRef::Action(action) => Some(action),
            StepRef::Trigger(_) => None,
        })
        .collect()
}

/// An action followed by its whole `next_action` chain, with nested children
pub fn get_chain_steps(action: &FlowAction) -> Vec<&FlowAction> {
    let mut steps = Vec::new();
    collect_chain(action, &mut steps);
    steps
        .into_iter()
        .filter_map(|step| match step {
            StepRef::Action(action) => Some(action),
            StepRef::Trigger(_) => None,
        })
        .collect()
}

fn collect_chain<'a>(first: &'a FlowAction, out: &mut Vec<StepRef<'a>>) {
    let mut current = Some(first);
    while let Some(action) = current {
        out.push(StepRef::Action(action));
        for child in action.children() {
            collect_chain(child, out);
        }
        current = action.next_action.as_deref();
    }
}

pub fn get_step<'a>(trigger: &'a FlowTrigger, name: &str) -> Option<StepRef<'a>> {
    get_all_steps(trigger)
        .into_iter()
        .find(|step| step.name() == name)
}

pub fn get_step_or_throw<'a>(trigger: &'a FlowTrigger, name: &str) -> Result<StepRef<'a>> {
    get_step(trigger, name).ok_or_else(|| PieceFlowError::not_found("Step", name))
}

pub fn get_action<'a>(trigger: &'a FlowTrigger, name: &str) -> Option<&'a FlowAction> {
    get_all_actions(trigger)
        .into_iter()
        .find(|action| action.name == name)
}

pub fn get_action_or_throw<'a>(trigger: &'a FlowTrigger, name: &str) -> Result<&'a FlowAction> {
    get_action(trigger, name).ok_or_else(|| PieceFlowError::not_found("Action", name))
}

#[inline]
pub fn is_trigger(step_type: StepType) -> bool {
    step_type.is_trigger()
}

#[inline]
pub fn is_action(step_type: StepType) -> bool {
    step_type.is_action()
}

/// Names of all steps in the tree
pub fn step_names(trigger: &FlowTrigger) -> HashSet<String> {
    get_all_steps(trigger)
        .into_iter()
        .map(|step| step.name().to_string())
        .collect()
}

/// First name of the form `<prefix>_<n>` (n >= 1) not in `taken`
pub fn find_unused_name(taken: &HashSet<String>, prefix: &str) -> String {
    let mut index = 1usize;
    loop {
        let candidate = format!("{}_{}", prefix, index);
        if !taken.contains(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Returns the first name that appears more than once, if any
pub fn find_duplicate_name(trigger: &FlowTrigger) -> Option<String> {
    let mut seen = HashSet::new();
    get_all_steps(trigger)
        .into_iter()
        .map(|step| step.name())
        .find(|name| !seen.insert(*name))
        .map(str::to_string)
}

/// Whether `name` is the action itself or nested inside it
pub fn is_nested_in(action: &FlowAction, name: &str) -> bool {
    get_nested_steps(action)
        .into_iter()
        .any(|step| step.name == name)
}

// ============================================================================
// Transforms
// ============================================================================

/// A new version whose every step has been passed through `map`
///
/// The callback may rewrite settings, validity and display data but must not
/// change a step's `name` or type.
pub fn transfer_flow<F>(version: &FlowVersion, mut map: F) -> FlowVersion
where
    F: FnMut(StepMut<'_>),
{
    let mut cloned = version.clone();
    transfer_trigger(&mut cloned.trigger, &mut map);
    cloned
}

/// In-place variant of [`transfer_flow`] over a bare step tree
pub fn transfer_trigger<F>(trigger: &mut FlowTrigger, map: &mut F)
where
    F: FnMut(StepMut<'_>),
{
    let name = trigger.name.clone();
    let trigger_type = trigger.trigger_type();
    map(StepMut::Trigger(&mut *trigger));
    debug_assert_eq!(trigger.name, name, "transfer must not rename steps");
    debug_assert_eq!(trigger.trigger_type(), trigger_type);

    if let Some(next) = trigger.next_action.as_mut() {
        transfer_chain(next, map);
    }
}

/// Apply `map` to an action chain starting at `first`
pub fn transfer_chain<F>(first: &mut Arc<FlowAction>, map: &mut F)
where
    F: FnMut(StepMut<'_>),
{
    let action = Arc::make_mut(first);
    let name = action.name.clone();
    let action_type = action.action_type();
    map(StepMut::Action(&mut *action));
    debug_assert_eq!(action.name, name, "transfer must not rename steps");
    debug_assert_eq!(action.action_type(), action_type);

    for child in action.children_mut() {
        transfer_chain(child, map);
    }
    if let Some(next) = action.next_action.as_mut() {
        transfer_chain(next, map);
    }
}

// ============================================================================
// Slot addressing
// ============================================================================

/// One hop from a slot's action to a child slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment {
    Next,
    LoopBody,
    Branch(usize),
}

/// Route from the trigger to the slot holding an action. The first segment is
/// always [`PathSegment::Next`] (the trigger's `next_action`).
pub type StepPath = Vec<PathSegment>;

/// Path to the slot holding the action called `name`
pub fn find_action_path(trigger: &FlowTrigger, name: &str) -> Option<StepPath> {
    let next = trigger.next_action.as_ref()?;
    let mut path = vec![PathSegment::Next];
    if search_action(next, name, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn search_action(action: &FlowAction, name: &str, path: &mut StepPath) -> bool {
    if action.name == name {
        return true;
    }
    match &action.kind {
        ActionKind::LoopOnItems {
            first_loop_action: Some(child),
            ..
        } => {
            path.push(PathSegment::LoopBody);
            if search_action(child, name, path) {
                return true;
            }
            path.pop();
        }
        ActionKind::Router { children, .. } => {
            for (index, child) in children.iter().enumerate() {
                if let Some(child) = child {
                    path.push(PathSegment::Branch(index));
                    if search_action(child, name, path) {
                        return true;
                    }
                    path.pop();
                }
            }
        }
        _ => {}
    }
    if let Some(next) = &action.next_action {
        path.push(PathSegment::Next);
        if search_action(next, name, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Mutable access to the slot at `path`, copying shared nodes along the way
pub fn slot_mut<'a>(
    trigger: &'a mut FlowTrigger,
    path: &[PathSegment],
) -> Option<&'a mut Option<Arc<FlowAction>>> {
    let (first, rest) = path.split_first()?;
    if *first != PathSegment::Next {
        return None;
    }
    let mut slot = &mut trigger.next_action;
    for segment in rest {
        let action = Arc::make_mut(slot.as_mut()?);
        slot = match (segment, &mut action.kind) {
            (PathSegment::Next, _) => &mut action.next_action,
            (
                PathSegment::LoopBody,
                ActionKind::LoopOnItems {
                    first_loop_action, ..
                },
            ) => first_loop_action,
            (PathSegment::Branch(index), ActionKind::Router { children, .. }) => {
                children.get_mut(*index)?
            }
            _ => return None,
        };
    }
    Some(slot)
}

/// Mutable access to the action called `name`
pub fn action_mut<'a>(trigger: &'a mut FlowTrigger, name: &str) -> Option<&'a mut FlowAction> {
    let path = find_action_path(trigger, name)?;
    let slot = slot_mut(trigger, &path)?;
    slot.as_mut().map(Arc::make_mut)
}
