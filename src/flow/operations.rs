//! Flow operation engine
//!
//! Applies one structural edit to a flow version and returns the edited copy.
//! The input version is never modified. Step validity flags are expected to be
//! set by the caller (see `service::validation`); the engine only recomputes
//! the version-level aggregates afterwards.

use crate::constants::{LATEST_SCHEMA_VERSION, STEP_NAME_PREFIX};
use crate::flow::connections::{collect_agent_ids, collect_connection_ids};
use crate::flow::structure::{
    action_mut, find_action_path, find_duplicate_name, find_unused_name, get_action,
    get_action_or_throw, get_all_steps, is_nested_in, slot_mut, step_names,
};
use crate::model::{
    ActionKind, BranchCondition, BranchType, FlowAction, FlowTrigger, FlowVersion,
    FlowVersionState, RouterBranch,
};
use crate::{PieceFlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a new or moved action goes relative to its parent step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepLocation {
    Before,
    #[default]
    After,
    InsideLoop,
    InsideBranch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddActionRequest {
    pub parent_step: String,

    #[serde(default)]
    pub step_location_relative_to_parent: StepLocation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    pub action: FlowAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteActionRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveActionRequest {
    pub name: String,

    pub new_parent_step: String,

    #[serde(default)]
    pub step_location_relative_to_new_parent: StepLocation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFlowRequest {
    pub display_name: String,

    pub trigger: FlowTrigger,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFlowRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseAsDraftRequest {
    pub version_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNameRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSkipActionRequest {
    pub names: Vec<String>,

    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateActionRequest {
    pub step_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBranchRequest {
    pub step_name: String,

    pub branch_index: usize,

    pub branch_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Vec<BranchCondition>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBranchRequest {
    pub step_name: String,

    pub branch_index: usize,
}

/// A user edit, as sent by the builder: `{"type": "ADD_ACTION", "request": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "request", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowOperation {
    AddAction(AddActionRequest),
    /// Replaces the named action's type and settings, keeping its position
    UpdateAction(FlowAction),
    DeleteAction(DeleteActionRequest),
    MoveAction(MoveActionRequest),
    /// Replaces the trigger, keeping the action chain behind it
    UpdateTrigger(FlowTrigger),
    ImportFlow(ImportFlowRequest),
    LockFlow(LockFlowRequest),
    UseAsDraft(UseAsDraftRequest),
    ChangeName(ChangeNameRequest),
    SetSkipAction(SetSkipActionRequest),
    DuplicateAction(DuplicateActionRequest),
    AddBranch(AddBranchRequest),
    DeleteBranch(DeleteBranchRequest),
}

/// Discriminant of a [`FlowOperation`], used for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowOperationType {
    AddAction,
    UpdateAction,
    DeleteAction,
    MoveAction,
    UpdateTrigger,
    ImportFlow,
    LockFlow,
    UseAsDraft,
    ChangeName,
    SetSkipAction,
    DuplicateAction,
    AddBranch,
    DeleteBranch,
}

impl FlowOperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowOperationType::AddAction => "ADD_ACTION",
            FlowOperationType::UpdateAction => "UPDATE_ACTION",
            FlowOperationType::DeleteAction => "DELETE_ACTION",
            FlowOperationType::MoveAction => "MOVE_ACTION",
            FlowOperationType::UpdateTrigger => "UPDATE_TRIGGER",
            FlowOperationType::ImportFlow => "IMPORT_FLOW",
            FlowOperationType::LockFlow => "LOCK_FLOW",
            FlowOperationType::UseAsDraft => "USE_AS_DRAFT",
            FlowOperationType::ChangeName => "CHANGE_NAME",
            FlowOperationType::SetSkipAction => "SET_SKIP_ACTION",
            FlowOperationType::DuplicateAction => "DUPLICATE_ACTION",
            FlowOperationType::AddBranch => "ADD_BRANCH",
            FlowOperationType::DeleteBranch => "DELETE_BRANCH",
        }
    }
}

impl fmt::Display for FlowOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FlowOperation {
    pub fn operation_type(&self) -> FlowOperationType {
        match self {
            FlowOperation::AddAction(_) => FlowOperationType::AddAction,
            FlowOperation::UpdateAction(_) => FlowOperationType::UpdateAction,
            FlowOperation::DeleteAction(_) => FlowOperationType::DeleteAction,
            FlowOperation::MoveAction(_) => FlowOperationType::MoveAction,
            FlowOperation::UpdateTrigger(_) => FlowOperationType::UpdateTrigger,
            FlowOperation::ImportFlow(_) => FlowOperationType::ImportFlow,
            FlowOperation::LockFlow(_) => FlowOperationType::LockFlow,
            FlowOperation::UseAsDraft(_) => FlowOperationType::UseAsDraft,
            FlowOperation::ChangeName(_) => FlowOperationType::ChangeName,
            FlowOperation::SetSkipAction(_) => FlowOperationType::SetSkipAction,
            FlowOperation::DuplicateAction(_) => FlowOperationType::DuplicateAction,
            FlowOperation::AddBranch(_) => FlowOperationType::AddBranch,
            FlowOperation::DeleteBranch(_) => FlowOperationType::DeleteBranch,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Apply `operation` to a copy of `version`
///
/// Unknown parents in ADD_ACTION yield a version marked `valid = false`;
/// unknown steps in UPDATE/MOVE/DUPLICATE/branch operations are
/// `ENTITY_NOT_FOUND` errors; unknown names in DELETE_ACTION are ignored.
pub fn apply(version: &FlowVersion, operation: &FlowOperation) -> Result<FlowVersion> {
    if version.is_locked() && !matches!(operation, FlowOperation::LockFlow(_)) {
        return Err(PieceFlowError::FlowVersionLocked {
            id: version.id.to_string(),
        });
    }

    let mut next = version.clone();
    let placed = match operation {
        FlowOperation::AddAction(req) => add_action(&mut next.trigger, req)?,
        FlowOperation::UpdateAction(action) => {
            update_action(&mut next.trigger, action)?;
            true
        }
        FlowOperation::DeleteAction(req) => {
            delete_actions(&mut next.trigger, &req.names);
            true
        }
        FlowOperation::MoveAction(req) => {
            move_action(&mut next.trigger, req)?;
            true
        }
        FlowOperation::UpdateTrigger(trigger) => {
            update_trigger(&mut next.trigger, trigger);
            true
        }
        FlowOperation::ImportFlow(req) => {
            import_flow(&mut next, req)?;
            true
        }
        FlowOperation::LockFlow(_) => {
            next.state = FlowVersionState::Locked;
            true
        }
        FlowOperation::UseAsDraft(req) => {
            return Err(PieceFlowError::validation(format!(
                "USE_AS_DRAFT of version {} must be resolved to IMPORT_FLOW before applying",
                req.version_id
            )));
        }
        FlowOperation::ChangeName(req) => {
            next.display_name = req.display_name.clone();
            true
        }
        FlowOperation::SetSkipAction(req) => {
            set_skip(&mut next.trigger, &req.names, req.skip)?;
            true
        }
        FlowOperation::DuplicateAction(req) => {
            duplicate_action(&mut next.trigger, &req.step_name)?;
            true
        }
        FlowOperation::AddBranch(req) => {
            add_branch(&mut next.trigger, req)?;
            true
        }
        FlowOperation::DeleteBranch(req) => {
            delete_branch(&mut next.trigger, req)?;
            true
        }
    };

    refresh_derived_fields(&mut next);
    if !placed {
        next.valid = false;
    }
    tracing::debug!(
        flow_version_id = %next.id,
        operation = %operation.operation_type(),
        valid = next.valid,
        "Applied flow operation"
    );
    Ok(next)
}

/// Recompute `valid`, `connectionIds` and `agentIds` from the step tree
pub fn refresh_derived_fields(version: &mut FlowVersion) {
    version.valid = get_all_steps(&version.trigger)
        .into_iter()
        .all(|step| step.valid());
    version.connection_ids = collect_connection_ids(&version.trigger);
    version.agent_ids = collect_agent_ids(&version.trigger);
}

/// Strip child pointers from an action about to be inserted
fn detach(mut action: FlowAction) -> FlowAction {
    action.next_action = None;
    match &mut action.kind {
        ActionKind::LoopOnItems {
            first_loop_action, ..
        } => *first_loop_action = None,
        ActionKind::Router { settings, children } => {
            *children = vec![None; settings.branches.len()];
        }
        ActionKind::Piece { .. } | ActionKind::Code { .. } => {}
    }
    action
}

/// Put `action` into `slot`, pushing the slot's current chain behind it
fn insert_into_slot(slot: &mut Option<Arc<FlowAction>>, mut action: FlowAction) {
    action.next_action = slot.take();
    *slot = Some(Arc::new(action));
}

fn resolve_branch_index(
    branches: &[RouterBranch],
    index: Option<usize>,
    name: Option<&str>,
) -> Result<usize> {
    if let Some(index) = index {
        if index < branches.len() {
            return Ok(index);
        }
        return Err(PieceFlowError::not_found("Branch", index.to_string()));
    }
    let name = name.ok_or_else(|| {
        PieceFlowError::validation("INSIDE_BRANCH requires branchIndex or branchName")
    })?;
    branches
        .iter()
        .position(|b| b.branch_name == name)
        .ok_or_else(|| PieceFlowError::not_found("Branch", name))
}

/// Slot under `parent` selected by `location` (everything but BEFORE)
fn child_slot<'a>(
    parent: &'a mut FlowAction,
    location: StepLocation,
    branch_index: Option<usize>,
    branch_name: Option<&str>,
) -> Result<&'a mut Option<Arc<FlowAction>>> {
    let parent_name = parent.name.clone();
    match (location, &mut parent.kind) {
        (StepLocation::After, _) => Ok(&mut parent.next_action),
        (
            StepLocation::InsideLoop,
            ActionKind::LoopOnItems {
                first_loop_action, ..
            },
        ) => Ok(first_loop_action),
        (StepLocation::InsideBranch, ActionKind::Router { settings, children }) => {
            let index = resolve_branch_index(&settings.branches, branch_index, branch_name)?;
            children.resize(settings.branches.len(), None);
            Ok(&mut children[index])
        }
        (StepLocation::InsideLoop, _) => Err(PieceFlowError::validation(format!(
            "Step {} is not a loop",
            parent_name
        ))),
        (StepLocation::InsideBranch, _) => Err(PieceFlowError::validation(format!(
            "Step {} is not a router",
            parent_name
        ))),
        (StepLocation::Before, _) => Err(PieceFlowError::validation(
            "BEFORE is resolved against the parent's own slot",
        )),
    }
}

/// Insert `action` relative to `parent`; `Ok(false)` when the parent is missing
fn insert_action(
    trigger: &mut FlowTrigger,
    parent: &str,
    location: StepLocation,
    branch_index: Option<usize>,
    branch_name: Option<&str>,
    action: FlowAction,
) -> Result<bool> {
    if parent == trigger.name {
        return match location {
            StepLocation::After => {
                insert_into_slot(&mut trigger.next_action, action);
                Ok(true)
            }
            other => Err(PieceFlowError::validation(format!(
                "Cannot insert {:?} the trigger",
                other
            ))),
        };
    }

    let Some(path) = find_action_path(trigger, parent) else {
        return Ok(false);
    };
    let slot = slot_mut(trigger, &path)
        .ok_or_else(|| PieceFlowError::not_found("Step", parent))?;

    if location == StepLocation::Before {
        insert_into_slot(slot, action);
        return Ok(true);
    }

    let parent_action = slot
        .as_mut()
        .map(Arc::make_mut)
        .ok_or_else(|| PieceFlowError::not_found("Step", parent))?;
    let target = child_slot(parent_action, location, branch_index, branch_name)?;
    insert_into_slot(target, action);
    Ok(true)
}

fn add_action(trigger: &mut FlowTrigger, req: &AddActionRequest) -> Result<bool> {
    if step_names(trigger).contains(&req.action.name) {
        return Err(PieceFlowError::validation(format!(
            "Step name {} is already used",
            req.action.name
        )));
    }

    let placed = insert_action(
        trigger,
        &req.parent_step,
        req.step_location_relative_to_parent,
        req.branch_index,
        req.branch_name.as_deref(),
        detach(req.action.clone()),
    )?;
    if !placed {
        tracing::warn!(
            parent_step = %req.parent_step,
            step = %req.action.name,
            "Parent step not found, flow marked invalid"
        );
    }
    Ok(placed)
}

fn update_action(trigger: &mut FlowTrigger, update: &FlowAction) -> Result<()> {
    let existing = action_mut(trigger, &update.name)
        .ok_or_else(|| PieceFlowError::not_found("Action", update.name.as_str()))?;

    let mut kind = update.kind.clone();
    match (&existing.kind, &mut kind) {
        (
            ActionKind::LoopOnItems {
                first_loop_action: current,
                ..
            },
            ActionKind::LoopOnItems {
                first_loop_action, ..
            },
        ) => *first_loop_action = current.clone(),
        (
            ActionKind::Router {
                children: current, ..
            },
            ActionKind::Router { settings, children },
        ) => {
            let mut kept = current.clone();
            kept.resize(settings.branches.len(), None);
            *children = kept;
        }
        (_, ActionKind::LoopOnItems {
            first_loop_action, ..
        }) => *first_loop_action = None,
        (_, ActionKind::Router { settings, children }) => {
            *children = vec![None; settings.branches.len()];
        }
        _ => {}
    }

    existing.display_name = update.display_name.clone();
    existing.valid = update.valid;
    existing.skip = update.skip;
    existing.kind = kind;
    Ok(())
}

fn delete_actions(trigger: &mut FlowTrigger, names: &[String]) {
    for name in names {
        let Some(path) = find_action_path(trigger, name) else {
            tracing::debug!(step = %name, "Delete skipped, step not found");
            continue;
        };
        if let Some(slot) = slot_mut(trigger, &path) {
            let removed = slot.take();
            *slot = removed.and_then(|action| action.next_action.clone());
        }
    }
}

fn move_action(trigger: &mut FlowTrigger, req: &MoveActionRequest) -> Result<()> {
    let moving = get_action_or_throw(trigger, &req.name)?;
    if is_nested_in(moving, &req.new_parent_step) {
        return Err(PieceFlowError::validation(format!(
            "Cannot move {} into its own subtree",
            req.name
        )));
    }
    if req.new_parent_step != trigger.name && get_action(trigger, &req.new_parent_step).is_none()
    {
        return Err(PieceFlowError::not_found(
            "Step",
            req.new_parent_step.as_str(),
        ));
    }

    let path = find_action_path(trigger, &req.name)
        .ok_or_else(|| PieceFlowError::not_found("Action", req.name.as_str()))?;
    let slot = slot_mut(trigger, &path)
        .ok_or_else(|| PieceFlowError::not_found("Action", req.name.as_str()))?;
    let removed = slot
        .take()
        .ok_or_else(|| PieceFlowError::not_found("Action", req.name.as_str()))?;
    *slot = removed.next_action.clone();

    let mut moved = Arc::unwrap_or_clone(removed);
    moved.next_action = None;

    let placed = insert_action(
        trigger,
        &req.new_parent_step,
        req.step_location_relative_to_new_parent,
        req.branch_index,
        req.branch_name.as_deref(),
        moved,
    )?;
    if placed {
        Ok(())
    } else {
        Err(PieceFlowError::not_found(
            "Step",
            req.new_parent_step.as_str(),
        ))
    }
}

fn update_trigger(trigger: &mut FlowTrigger, update: &FlowTrigger) {
    let next_action = trigger.next_action.take();
    let name = std::mem::take(&mut trigger.name);
    *trigger = FlowTrigger {
        name,
        next_action,
        ..update.clone()
    };
}

fn import_flow(version: &mut FlowVersion, req: &ImportFlowRequest) -> Result<()> {
    if let Some(duplicate) = find_duplicate_name(&req.trigger) {
        return Err(PieceFlowError::validation(format!(
            "Imported flow uses step name {} more than once",
            duplicate
        )));
    }
    version.display_name = req.display_name.clone();
    version.trigger = req.trigger.clone();
    version.schema_version = Some(req.schema_version.unwrap_or(LATEST_SCHEMA_VERSION));
    Ok(())
}

fn set_skip(trigger: &mut FlowTrigger, names: &[String], skip: bool) -> Result<()> {
    for name in names {
        let action = action_mut(trigger, name)
            .ok_or_else(|| PieceFlowError::not_found("Action", name.as_str()))?;
        action.skip = skip;
    }
    Ok(())
}

/// Give every step in the subtree rooted at `action` a fresh generated name
fn rename_subtree(action: &mut FlowAction, taken: &mut HashSet<String>) {
    action.name = find_unused_name(taken, STEP_NAME_PREFIX);
    taken.insert(action.name.clone());
    for child in action.children_mut() {
        rename_subtree(Arc::make_mut(child), taken);
    }
    if let Some(next) = action.next_action.as_mut() {
        rename_subtree(Arc::make_mut(next), taken);
    }
}

fn duplicate_action(trigger: &mut FlowTrigger, step_name: &str) -> Result<()> {
    let original = get_action_or_throw(trigger, step_name)?;
    let mut copy = original.clone();
    copy.next_action = None;

    let mut taken = step_names(trigger);
    rename_subtree(&mut copy, &mut taken);

    let placed = insert_action(trigger, step_name, StepLocation::After, None, None, copy)?;
    if placed {
        Ok(())
    } else {
        Err(PieceFlowError::not_found("Action", step_name))
    }
}

fn router_mut<'a>(
    trigger: &'a mut FlowTrigger,
    step_name: &str,
) -> Result<(
    &'a mut Vec<RouterBranch>,
    &'a mut Vec<Option<Arc<FlowAction>>>,
)> {
    let action = action_mut(trigger, step_name)
        .ok_or_else(|| PieceFlowError::not_found("Action", step_name))?;
    match &mut action.kind {
        ActionKind::Router { settings, children } => {
            children.resize(settings.branches.len(), None);
            Ok((&mut settings.branches, children))
        }
        _ => Err(PieceFlowError::validation(format!(
            "Step {} is not a router",
            step_name
        ))),
    }
}

fn default_conditions() -> Vec<Vec<BranchCondition>> {
    vec![vec![BranchCondition {
        first_value: String::new(),
        operator: Some("TEXT_EXACTLY_MATCHES".to_string()),
        second_value: Some(String::new()),
        case_sensitive: Some(false),
    }]]
}

fn add_branch(trigger: &mut FlowTrigger, req: &AddBranchRequest) -> Result<()> {
    let (branches, children) = router_mut(trigger, &req.step_name)?;
    if req.branch_index > branches.len() {
        return Err(PieceFlowError::validation(format!(
            "Branch index {} out of range",
            req.branch_index
        )));
    }

    // fallback stays last
    let mut index = req.branch_index;
    if index == branches.len()
        && branches
            .last()
            .is_some_and(|b| b.branch_type == BranchType::Fallback)
    {
        index -= 1;
    }

    let conditions = req.conditions.clone().unwrap_or_else(default_conditions);
    branches.insert(index, RouterBranch::condition(&req.branch_name, conditions));
    children.insert(index, None);
    Ok(())
}

fn delete_branch(trigger: &mut FlowTrigger, req: &DeleteBranchRequest) -> Result<()> {
    let (branches, children) = router_mut(trigger, &req.step_name)?;
    let Some(branch) = branches.get(req.branch_index) else {
        return Err(PieceFlowError::not_found(
            "Branch",
            req.branch_index.to_string(),
        ));
    };
    if branch.branch_type == BranchType::Fallback {
        return Err(PieceFlowError::validation(
            "The fallback branch cannot be deleted",
        ));
    }
    branches.remove(req.branch_index);
    children.remove(req.branch_index);
    Ok(())
}
