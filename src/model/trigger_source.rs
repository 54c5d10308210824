//! Persisted binding between a flow version's trigger and its live scheduling

use super::piece::TriggerStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cron cadence of a recurring job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    pub cron_expression: String,

    pub timezone: String,

    #[serde(default)]
    pub failure_count: u32,
}

impl ScheduleOptions {
    pub fn new(cron_expression: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            timezone: timezone.into(),
            failure_count: 0,
        }
    }
}

/// Live trigger registration of a flow version
///
/// Created when a trigger is enabled and soft-deleted (`deleted` set) when it
/// is disabled. Live rows drive job recovery after restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSource {
    pub id: Uuid,

    pub flow_id: Uuid,

    pub flow_version_id: Uuid,

    pub project_id: String,

    pub piece_name: String,

    pub piece_version: String,

    pub trigger_name: String,

    #[serde(rename = "type")]
    pub strategy: TriggerStrategy,

    /// Present for POLLING sources and for WEBHOOK sources renewed on a cron
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleOptions>,

    #[serde(default)]
    pub simulate: bool,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
}

impl TriggerSource {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.deleted.is_none()
    }
}
