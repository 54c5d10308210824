//! Step tree: triggers and actions
//!
//! A flow version owns exactly one trigger. Actions hang off the trigger as a
//! linked chain (`nextAction`), with LOOP_ON_ITEMS actions owning a nested
//! chain (`firstLoopAction`) and ROUTER actions owning one chain per branch
//! (`children`). Child pointers are `Arc`s so that editing a cloned version
//! only copies the nodes on the edited path; untouched subtrees stay shared
//! with the version they were cloned from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Raw step input, as authored in the builder (may contain `{{ }}` templates)
pub type StepInput = Map<String, Value>;

/// Discriminant of a trigger node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowTriggerType {
    Empty,
    Piece,
}

/// Discriminant of an action node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowActionType {
    Piece,
    Code,
    LoopOnItems,
    Router,
}

/// Discriminant of any step in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    Trigger(FlowTriggerType),
    Action(FlowActionType),
}

impl StepType {
    #[inline]
    pub fn is_trigger(self) -> bool {
        matches!(self, StepType::Trigger(_))
    }

    #[inline]
    pub fn is_action(self) -> bool {
        matches!(self, StepType::Action(_))
    }

    /// True for PIECE triggers and PIECE actions
    #[inline]
    pub fn is_piece(self) -> bool {
        matches!(
            self,
            StepType::Trigger(FlowTriggerType::Piece) | StepType::Action(FlowActionType::Piece)
        )
    }
}

/// Builder-side metadata: test output and the user's selection in it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputUiInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_selected_data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data_file_id: Option<String>,
}

impl InputUiInfo {
    /// Drop every captured payload, keeping only bookkeeping fields
    pub fn clear_sample_data(&mut self) {
        self.sample_data = None;
        self.current_selected_data = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToggleOption {
    pub value: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<ToggleOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_failure: Option<ToggleOption>,
}

/// Settings of a PIECE trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceTriggerSettings {
    pub piece_name: String,

    pub piece_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_name: Option<String>,

    #[serde(default)]
    pub input: StepInput,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub property_settings: Map<String, Value>,

    #[serde(default)]
    pub input_ui_info: InputUiInfo,
}

/// Settings of a PIECE action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceActionSettings {
    pub piece_name: String,

    pub piece_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,

    #[serde(default)]
    pub input: StepInput,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub property_settings: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling_options: Option<ErrorHandlingOptions>,

    #[serde(default)]
    pub input_ui_info: InputUiInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCode {
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub package_json: String,
}

/// Settings of a CODE action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeActionSettings {
    #[serde(default)]
    pub source_code: SourceCode,

    #[serde(default)]
    pub input: StepInput,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling_options: Option<ErrorHandlingOptions>,

    #[serde(default)]
    pub input_ui_info: InputUiInfo,
}

/// Settings of a LOOP_ON_ITEMS action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOnItemsSettings {
    /// Template expression resolving to the list to iterate
    #[serde(default)]
    pub items: String,

    #[serde(default)]
    pub input_ui_info: InputUiInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouterExecutionType {
    #[default]
    ExecuteFirstMatch,
    ExecuteAllMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchType {
    Condition,
    Fallback,
}

/// One comparison inside a router branch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchCondition {
    #[serde(default)]
    pub first_value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

/// A router branch. `conditions` is an OR of AND-groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterBranch {
    pub branch_name: String,

    pub branch_type: BranchType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Vec<BranchCondition>>,
}

impl RouterBranch {
    pub fn condition(branch_name: &str, conditions: Vec<Vec<BranchCondition>>) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            branch_type: BranchType::Condition,
            conditions,
        }
    }

    pub fn fallback(branch_name: &str) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            branch_type: BranchType::Fallback,
            conditions: Vec::new(),
        }
    }
}

/// Settings of a ROUTER action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSettings {
    #[serde(default)]
    pub branches: Vec<RouterBranch>,

    #[serde(default)]
    pub execution_type: RouterExecutionType,

    #[serde(default)]
    pub input_ui_info: InputUiInfo,
}

/// Variant-specific part of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    Empty {
        #[serde(default)]
        settings: Map<String, Value>,
    },
    Piece {
        settings: PieceTriggerSettings,
    },
}

/// Root node of a flow version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTrigger {
    pub name: String,

    pub display_name: String,

    #[serde(default)]
    pub valid: bool,

    #[serde(flatten)]
    pub kind: TriggerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Arc<FlowAction>>,
}

impl FlowTrigger {
    /// The placeholder trigger every new flow starts with
    pub fn empty() -> Self {
        Self {
            name: crate::constants::TRIGGER_STEP_NAME.to_string(),
            display_name: crate::constants::EMPTY_TRIGGER_DISPLAY_NAME.to_string(),
            valid: false,
            kind: TriggerKind::Empty {
                settings: Map::new(),
            },
            next_action: None,
        }
    }

    /// A PIECE trigger with no successor
    pub fn piece(
        display_name: &str,
        piece_name: &str,
        piece_version: &str,
        trigger_name: &str,
        input: StepInput,
    ) -> Self {
        Self {
            name: crate::constants::TRIGGER_STEP_NAME.to_string(),
            display_name: display_name.to_string(),
            valid: false,
            kind: TriggerKind::Piece {
                settings: PieceTriggerSettings {
                    piece_name: piece_name.to_string(),
                    piece_version: piece_version.to_string(),
                    trigger_name: Some(trigger_name.to_string()),
                    input,
                    ..Default::default()
                },
            },
            next_action: None,
        }
    }

    pub fn trigger_type(&self) -> FlowTriggerType {
        match self.kind {
            TriggerKind::Empty { .. } => FlowTriggerType::Empty,
            TriggerKind::Piece { .. } => FlowTriggerType::Piece,
        }
    }

    pub fn piece_settings(&self) -> Option<&PieceTriggerSettings> {
        match &self.kind {
            TriggerKind::Piece { settings } => Some(settings),
            TriggerKind::Empty { .. } => None,
        }
    }

    pub fn piece_settings_mut(&mut self) -> Option<&mut PieceTriggerSettings> {
        match &mut self.kind {
            TriggerKind::Piece { settings } => Some(settings),
            TriggerKind::Empty { .. } => None,
        }
    }
}

/// Variant-specific part of an action, including nested child chains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ActionKind {
    Piece {
        settings: PieceActionSettings,
    },
    Code {
        settings: CodeActionSettings,
    },
    LoopOnItems {
        settings: LoopOnItemsSettings,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_loop_action: Option<Arc<FlowAction>>,
    },
    Router {
        settings: RouterSettings,
        #[serde(default)]
        children: Vec<Option<Arc<FlowAction>>>,
    },
}

/// Action node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAction {
    pub name: String,

    pub display_name: String,

    #[serde(default)]
    pub valid: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,

    #[serde(flatten)]
    pub kind: ActionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Arc<FlowAction>>,
}

impl FlowAction {
    fn with_kind(name: &str, display_name: &str, kind: ActionKind) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            valid: false,
            skip: false,
            kind,
            next_action: None,
        }
    }

    pub fn piece(
        name: &str,
        piece_name: &str,
        piece_version: &str,
        action_name: &str,
        input: StepInput,
    ) -> Self {
        Self::with_kind(
            name,
            action_name,
            ActionKind::Piece {
                settings: PieceActionSettings {
                    piece_name: piece_name.to_string(),
                    piece_version: piece_version.to_string(),
                    action_name: Some(action_name.to_string()),
                    input,
                    ..Default::default()
                },
            },
        )
    }

    pub fn code(name: &str, code: &str) -> Self {
        Self::with_kind(
            name,
            "Code",
            ActionKind::Code {
                settings: CodeActionSettings {
                    source_code: SourceCode {
                        code: code.to_string(),
                        package_json: "{}".to_string(),
                    },
                    ..Default::default()
                },
            },
        )
    }

    pub fn loop_on_items(name: &str, items: &str) -> Self {
        Self::with_kind(
            name,
            "Loop on Items",
            ActionKind::LoopOnItems {
                settings: LoopOnItemsSettings {
                    items: items.to_string(),
                    ..Default::default()
                },
                first_loop_action: None,
            },
        )
    }

    /// A router with one empty child slot per branch
    pub fn router(name: &str, branches: Vec<RouterBranch>) -> Self {
        let children = vec![None; branches.len()];
        Self::with_kind(
            name,
            "Router",
            ActionKind::Router {
                settings: RouterSettings {
                    branches,
                    ..Default::default()
                },
                children,
            },
        )
    }

    pub fn action_type(&self) -> FlowActionType {
        match self.kind {
            ActionKind::Piece { .. } => FlowActionType::Piece,
            ActionKind::Code { .. } => FlowActionType::Code,
            ActionKind::LoopOnItems { .. } => FlowActionType::LoopOnItems,
            ActionKind::Router { .. } => FlowActionType::Router,
        }
    }

    pub fn piece_settings(&self) -> Option<&PieceActionSettings> {
        match &self.kind {
            ActionKind::Piece { settings } => Some(settings),
            _ => None,
        }
    }

    pub fn piece_settings_mut(&mut self) -> Option<&mut PieceActionSettings> {
        match &mut self.kind {
            ActionKind::Piece { settings } => Some(settings),
            _ => None,
        }
    }

    /// Nested child chains (loop body, router branches), excluding `next_action`
    pub fn children(&self) -> Vec<&Arc<FlowAction>> {
        match &self.kind {
            ActionKind::LoopOnItems {
                first_loop_action, ..
            } => first_loop_action.iter().collect(),
            ActionKind::Router { children, .. } => children.iter().flatten().collect(),
            ActionKind::Piece { .. } | ActionKind::Code { .. } => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Arc<FlowAction>> {
        match &mut self.kind {
            ActionKind::LoopOnItems {
                first_loop_action, ..
            } => first_loop_action.iter_mut().collect(),
            ActionKind::Router { children, .. } => children.iter_mut().flatten().collect(),
            ActionKind::Piece { .. } | ActionKind::Code { .. } => Vec::new(),
        }
    }
}

/// Shared borrow of any step
#[derive(Debug, Clone, Copy)]
pub enum StepRef<'a> {
    Trigger(&'a FlowTrigger),
    Action(&'a FlowAction),
}

impl<'a> StepRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            StepRef::Trigger(t) => &t.name,
            StepRef::Action(a) => &a.name,
        }
    }

    pub fn display_name(&self) -> &'a str {
        match self {
            StepRef::Trigger(t) => &t.display_name,
            StepRef::Action(a) => &a.display_name,
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            StepRef::Trigger(t) => t.valid,
            StepRef::Action(a) => a.valid,
        }
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepRef::Trigger(t) => StepType::Trigger(t.trigger_type()),
            StepRef::Action(a) => StepType::Action(a.action_type()),
        }
    }

    /// Authored input of the step, when the variant has one
    pub fn input(&self) -> Option<&'a StepInput> {
        match self {
            StepRef::Trigger(t) => t.piece_settings().map(|s| &s.input),
            StepRef::Action(a) => match &a.kind {
                ActionKind::Piece { settings } => Some(&settings.input),
                ActionKind::Code { settings } => Some(&settings.input),
                ActionKind::LoopOnItems { .. } | ActionKind::Router { .. } => None,
            },
        }
    }

    /// `(pieceName, pieceVersion)` for piece-backed steps
    pub fn piece(&self) -> Option<(&'a str, &'a str)> {
        match self {
            StepRef::Trigger(t) => t
                .piece_settings()
                .map(|s| (s.piece_name.as_str(), s.piece_version.as_str())),
            StepRef::Action(a) => a
                .piece_settings()
                .map(|s| (s.piece_name.as_str(), s.piece_version.as_str())),
        }
    }
}

/// Exclusive borrow of any step
#[derive(Debug)]
pub enum StepMut<'a> {
    Trigger(&'a mut FlowTrigger),
    Action(&'a mut FlowAction),
}

impl StepMut<'_> {
    pub fn name(&self) -> &str {
        match self {
            StepMut::Trigger(t) => &t.name,
            StepMut::Action(a) => &a.name,
        }
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepMut::Trigger(t) => StepType::Trigger(t.trigger_type()),
            StepMut::Action(a) => StepType::Action(a.action_type()),
        }
    }

    pub fn input_mut(&mut self) -> Option<&mut StepInput> {
        match self {
            StepMut::Trigger(t) => t.piece_settings_mut().map(|s| &mut s.input),
            StepMut::Action(a) => match &mut a.kind {
                ActionKind::Piece { settings } => Some(&mut settings.input),
                ActionKind::Code { settings } => Some(&mut settings.input),
                ActionKind::LoopOnItems { .. } | ActionKind::Router { .. } => None,
            },
        }
    }

    pub fn input_ui_info_mut(&mut self) -> Option<&mut InputUiInfo> {
        match self {
            StepMut::Trigger(t) => t.piece_settings_mut().map(|s| &mut s.input_ui_info),
            StepMut::Action(a) => Some(match &mut a.kind {
                ActionKind::Piece { settings } => &mut settings.input_ui_info,
                ActionKind::Code { settings } => &mut settings.input_ui_info,
                ActionKind::LoopOnItems { settings, .. } => &mut settings.input_ui_info,
                ActionKind::Router { settings, .. } => &mut settings.input_ui_info,
            }),
        }
    }

    /// Mutable piece version, for piece-backed steps
    pub fn piece_version_mut(&mut self) -> Option<&mut String> {
        match self {
            StepMut::Trigger(t) => t.piece_settings_mut().map(|s| &mut s.piece_version),
            StepMut::Action(a) => a.piece_settings_mut().map(|s| &mut s.piece_version),
        }
    }

    /// Mutable piece name, for piece-backed steps
    pub fn piece_name_mut(&mut self) -> Option<&mut String> {
        match self {
            StepMut::Trigger(t) => t.piece_settings_mut().map(|s| &mut s.piece_name),
            StepMut::Action(a) => a.piece_settings_mut().map(|s| &mut s.piece_name),
        }
    }

    pub fn as_step_ref(&self) -> StepRef<'_> {
        match self {
            StepMut::Trigger(t) => StepRef::Trigger(t),
            StepMut::Action(a) => StepRef::Action(a),
        }
    }
}
