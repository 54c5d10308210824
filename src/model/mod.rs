//! Core data models for Pieceflow
//!
//! Flow versions and their step trees, piece metadata, and trigger sources.

pub mod piece;
pub mod step;
pub mod trigger_source;

pub use piece::*;
pub use step::*;
pub use trigger_source::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Editing state of a flow version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowVersionState {
    /// Editable working copy
    Draft,
    /// Published snapshot; never edited again
    Locked,
}

impl FlowVersionState {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowVersionState::Draft => "DRAFT",
            FlowVersionState::Locked => "LOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(FlowVersionState::Draft),
            "LOCKED" => Some(FlowVersionState::Locked),
            _ => None,
        }
    }
}

/// One snapshot of a flow's editable structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    pub id: Uuid,

    pub flow_id: Uuid,

    pub display_name: String,

    /// `None` for rows written before schema versioning existed
    #[serde(default)]
    pub schema_version: Option<u32>,

    pub trigger: FlowTrigger,

    #[serde(default)]
    pub valid: bool,

    pub state: FlowVersionState,

    /// External ids of the connections referenced by step inputs (derived)
    #[serde(default)]
    pub connection_ids: Vec<String>,

    /// Agents referenced by agent piece steps (derived)
    #[serde(default)]
    pub agent_ids: Vec<String>,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl FlowVersion {
    /// A fresh DRAFT holding only the EMPTY trigger, at the latest schema version
    pub fn new_empty(flow_id: Uuid, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            display_name: display_name.into(),
            schema_version: Some(crate::constants::LATEST_SCHEMA_VERSION),
            trigger: FlowTrigger::empty(),
            valid: false,
            state: FlowVersionState::Draft,
            connection_ids: Vec::new(),
            agent_ids: Vec::new(),
            created: now,
            updated: now,
            updated_by: None,
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state == FlowVersionState::Locked
    }

    /// Schema version with legacy rows treated as version 0
    #[must_use]
    pub fn effective_schema_version(&self) -> u32 {
        self.schema_version.unwrap_or(0)
    }
}
