//! Step validation ahead of flow operations
//!
//! [`FlowValidator::prepare_request`] copies an incoming operation and sets
//! the `valid` flag of every step it carries. PIECE steps are checked against
//! the props their piece declares; LOOP_ON_ITEMS and ROUTER steps against
//! fixed schemas; CODE steps are always valid and an EMPTY trigger never is.
//!
//! An unknown piece, action or trigger makes the step invalid. It is never an
//! error, so the builder can still save and highlight the step.

use crate::constants::AUTH_PROP_NAME;
use crate::flow::operations::{AddActionRequest, FlowOperation, ImportFlowRequest};
use crate::flow::structure::{get_all_steps, transfer_trigger};
use crate::model::{
    ActionKind, FlowAction, FlowTrigger, PieceMetadata, PropertyMap, StepMut, StepRef, TriggerKind,
};
use crate::piece::props::validate_props;
use crate::piece::{PieceMetadataProvider, PieceQuery};
use crate::{PieceFlowError, Result};
use futures::future::join_all;
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Router operators comparing `firstValue` with `secondValue`
pub const BINARY_OPERATORS: &[&str] = &[
    "TEXT_CONTAINS",
    "TEXT_DOES_NOT_CONTAIN",
    "TEXT_EXACTLY_MATCHES",
    "TEXT_DOES_NOT_EXACTLY_MATCH",
    "TEXT_STARTS_WITH",
    "TEXT_DOES_NOT_START_WITH",
    "TEXT_ENDS_WITH",
    "TEXT_DOES_NOT_END_WITH",
    "NUMBER_IS_GREATER_THAN",
    "NUMBER_IS_LESS_THAN",
    "NUMBER_IS_EQUAL_TO",
    "DATE_IS_BEFORE",
    "DATE_IS_EQUAL",
    "DATE_IS_AFTER",
    "LIST_CONTAINS",
    "LIST_DOES_NOT_CONTAIN",
];

/// Router operators that only look at `firstValue`
pub const UNARY_OPERATORS: &[&str] = &[
    "BOOLEAN_IS_TRUE",
    "BOOLEAN_IS_FALSE",
    "EXISTS",
    "DOES_NOT_EXIST",
    "LIST_IS_EMPTY",
    "LIST_IS_NOT_EMPTY",
];

static LOOP_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
    let schema = json!({
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": { "type": "string", "minLength": 1 }
        }
    });
    jsonschema::validator_for(&schema).expect("Failed to compile loop settings schema")
});

static ROUTER_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
    let condition = json!({
        "anyOf": [
            {
                "type": "object",
                "required": ["firstValue", "operator", "secondValue"],
                "properties": {
                    "firstValue": { "type": "string", "minLength": 1 },
                    "operator": { "enum": BINARY_OPERATORS },
                    "secondValue": { "type": "string" }
                }
            },
            {
                "type": "object",
                "required": ["firstValue", "operator"],
                "properties": {
                    "firstValue": { "type": "string", "minLength": 1 },
                    "operator": { "enum": UNARY_OPERATORS }
                }
            }
        ]
    });
    let schema = json!({
        "type": "object",
        "required": ["branches", "executionType"],
        "properties": {
            "executionType": { "enum": ["EXECUTE_FIRST_MATCH", "EXECUTE_ALL_MATCH"] },
            "branches": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "anyOf": [
                        {
                            "type": "object",
                            "required": ["branchName", "branchType", "conditions"],
                            "properties": {
                                "branchName": { "type": "string", "minLength": 1 },
                                "branchType": { "const": "CONDITION" },
                                "conditions": {
                                    "type": "array",
                                    "minItems": 1,
                                    "items": { "type": "array", "minItems": 1, "items": condition }
                                }
                            }
                        },
                        {
                            "type": "object",
                            "required": ["branchName", "branchType"],
                            "properties": {
                                "branchName": { "type": "string", "minLength": 1 },
                                "branchType": { "const": "FALLBACK" }
                            }
                        }
                    ]
                }
            }
        }
    });
    jsonschema::validator_for(&schema).expect("Failed to compile router settings schema")
});

/// Caller scope forwarded to the piece registry
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationScope<'a> {
    pub project_id: Option<&'a str>,
    pub platform_id: Option<&'a str>,
}

/// Sets step validity on incoming flow operations
#[derive(Clone)]
pub struct FlowValidator {
    pieces: Arc<dyn PieceMetadataProvider>,
}

impl FlowValidator {
    pub fn new(pieces: Arc<dyn PieceMetadataProvider>) -> Self {
        Self { pieces }
    }

    pub fn pieces(&self) -> &Arc<dyn PieceMetadataProvider> {
        &self.pieces
    }

    /// A copy of `operation` with the validity of every carried step set
    #[tracing::instrument(skip_all, fields(operation = %operation.operation_type()))]
    pub async fn prepare_request(
        &self,
        scope: ValidationScope<'_>,
        operation: &FlowOperation,
    ) -> Result<FlowOperation> {
        let mut prepared = operation.clone();
        match &mut prepared {
            FlowOperation::AddAction(AddActionRequest { action, .. })
            | FlowOperation::UpdateAction(action) => {
                action.valid = self.validate_action(scope, action).await?;
            }
            FlowOperation::UpdateTrigger(trigger) => {
                trigger.valid = self.validate_trigger(scope, trigger).await?;
            }
            FlowOperation::ImportFlow(ImportFlowRequest { trigger, .. }) => {
                self.validate_tree(scope, trigger).await?;
            }
            _ => {}
        }
        Ok(prepared)
    }

    /// Validate every step of a tree, resolving pieces concurrently
    pub async fn validate_tree(&self, scope: ValidationScope<'_>, trigger: &mut FlowTrigger) -> Result<()> {
        let checks = get_all_steps(trigger).into_iter().map(|step| async move {
            let valid = match step {
                StepRef::Trigger(t) => self.validate_trigger(scope, t).await?,
                StepRef::Action(a) => self.validate_action(scope, a).await?,
            };
            Ok::<_, PieceFlowError>((step.name().to_string(), valid))
        });
        let validity: HashMap<String, bool> = join_all(checks)
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        transfer_trigger(trigger, &mut |step: StepMut<'_>| {
            let valid = validity.get(step.name()).copied().unwrap_or(false);
            match step {
                StepMut::Trigger(t) => t.valid = valid,
                StepMut::Action(a) => a.valid = valid,
            }
        });
        Ok(())
    }

    pub async fn validate_trigger(
        &self,
        scope: ValidationScope<'_>,
        trigger: &FlowTrigger,
    ) -> Result<bool> {
        let settings = match &trigger.kind {
            TriggerKind::Empty { .. } => return Ok(false),
            TriggerKind::Piece { settings } => settings,
        };
        let Some(trigger_name) = settings.trigger_name.as_deref() else {
            return Ok(false);
        };
        let Some(piece) = self
            .resolve_piece(scope, &settings.piece_name, &settings.piece_version)
            .await?
        else {
            return Ok(false);
        };
        let Some(metadata) = piece.trigger(trigger_name) else {
            tracing::debug!(piece_name = %piece.name, trigger = %trigger_name, "Trigger not declared by piece");
            return Ok(false);
        };

        let props = with_auth(&metadata.props, &piece, metadata.require_auth);
        Ok(validate_props(&props, &settings.input))
    }

    pub async fn validate_action(
        &self,
        scope: ValidationScope<'_>,
        action: &FlowAction,
    ) -> Result<bool> {
        match &action.kind {
            ActionKind::Code { .. } => Ok(true),
            ActionKind::LoopOnItems { settings, .. } => {
                Ok(LOOP_SCHEMA.is_valid(&serde_json::to_value(settings)?))
            }
            ActionKind::Router { settings, .. } => {
                Ok(ROUTER_SCHEMA.is_valid(&serde_json::to_value(settings)?))
            }
            ActionKind::Piece { settings } => {
                let Some(action_name) = settings.action_name.as_deref() else {
                    return Ok(false);
                };
                let Some(piece) = self
                    .resolve_piece(scope, &settings.piece_name, &settings.piece_version)
                    .await?
                else {
                    return Ok(false);
                };
                let Some(metadata) = piece.action(action_name) else {
                    tracing::debug!(piece_name = %piece.name, action = %action_name, "Action not declared by piece");
                    return Ok(false);
                };

                let props = with_auth(&metadata.props, &piece, metadata.require_auth);
                Ok(validate_props(&props, &settings.input))
            }
        }
    }

    /// `None` when the piece or a matching version is unknown
    async fn resolve_piece(
        &self,
        scope: ValidationScope<'_>,
        name: &str,
        version: &str,
    ) -> Result<Option<Arc<PieceMetadata>>> {
        let query = PieceQuery::new(name, version).with_project(scope.project_id, scope.platform_id);
        match self.pieces.get(&query).await {
            Ok(piece) => {
                if piece.is_none() {
                    tracing::debug!(piece_name = %name, piece_version = %version, "Piece not found");
                }
                Ok(piece)
            }
            Err(PieceFlowError::InvalidPieceVersion(reason)) => {
                tracing::debug!(piece_name = %name, piece_version = %version, %reason, "Unresolvable piece version");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Declared props plus the piece's `auth` prop when the step needs it
fn with_auth(props: &PropertyMap, piece: &PieceMetadata, require_auth: bool) -> PropertyMap {
    let mut merged = props.clone();
    if require_auth && let Some(auth) = &piece.auth {
        merged.insert(AUTH_PROP_NAME.to_string(), auth.clone());
    }
    merged
}

/// Validate a bare settings value against the loop schema
pub fn is_valid_loop_settings(settings: &Value) -> bool {
    LOOP_SCHEMA.is_valid(settings)
}

/// Validate a bare settings value against the router schema
pub fn is_valid_router_settings(settings: &Value) -> bool {
    ROUTER_SCHEMA.is_valid(settings)
}
