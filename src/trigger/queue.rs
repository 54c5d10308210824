//! Scheduler backend
//!
//! Jobs are keyed by an idempotent `id`: adding a job whose id already exists
//! replaces it, so recovery scans can re-add everything they derive.

use crate::model::ScheduleOptions;
use crate::{PieceFlowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Recurring poll of a POLLING trigger
    ExecutePolling,
    /// Recurring renewal of a WEBHOOK subscription
    RenewWebhook,
    /// One-shot run of a flow
    ExecuteFlow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub project_id: String,

    pub flow_version_id: Uuid,

    /// Denormalised from the flow version; missing on jobs queued by old builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: String,

    pub job_type: JobType,

    pub data: JobData,

    /// Repeat cadence; `None` for one-shot jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleOptions>,
}

impl JobSpec {
    pub fn polling_id(flow_version_id: Uuid) -> String {
        format!("polling:{}", flow_version_id)
    }

    pub fn renew_webhook_id(flow_version_id: Uuid) -> String {
        format!("renew-webhook:{}", flow_version_id)
    }

    pub fn is_repeating(&self) -> bool {
        self.schedule.is_some()
    }
}

/// Parse a unix (5-field) or seconds-first (6/7-field) cron expression
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| {
        PieceFlowError::scheduler(format!("Invalid cron expression '{}': {}", expression, e))
    })
}

/// Next fire time strictly after `after`, evaluated in UTC
pub fn next_run(schedule: &ScheduleOptions, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(parse_cron(&schedule.cron_expression)?.after(&after).next())
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert or replace the job with `job.id`
    async fn add(&self, job: JobSpec) -> Result<()>;

    /// Returns whether a job was removed
    async fn remove(&self, id: &str) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<JobSpec>>;

    /// One-shot jobs of `job_type` in enqueue order
    async fn list_pending(
        &self,
        job_type: JobType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobSpec>>;

    async fn update_data(&self, id: &str, data: JobData) -> Result<()>;
}

/// Job queue held in memory
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: DashMap<String, (u64, JobSpec)>,
    sequence: AtomicU64,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshot of every job, in enqueue order
    pub fn jobs(&self) -> Vec<JobSpec> {
        let mut jobs: Vec<(u64, JobSpec)> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_unstable_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, job)| job).collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn add(&self, job: JobSpec) -> Result<()> {
        if let Some(schedule) = &job.schedule {
            parse_cron(&schedule.cron_expression)?;
        }
        let seq = match self.jobs.get(&job.id) {
            Some(existing) => existing.0,
            None => self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        tracing::debug!(job_id = %job.id, job_type = ?job.job_type, "Queued job");
        self.jobs.insert(job.id.clone(), (seq, job));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.jobs.remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<JobSpec>> {
        Ok(self.jobs.get(id).map(|e| e.1.clone()))
    }

    async fn list_pending(
        &self,
        job_type: JobType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobSpec>> {
        Ok(self
            .jobs()
            .into_iter()
            .filter(|job| job.job_type == job_type && !job.is_repeating())
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn update_data(&self, id: &str, data: JobData) -> Result<()> {
        match self.jobs.get_mut(id) {
            Some(mut entry) => {
                entry.1.data = data;
                Ok(())
            }
            None => Err(PieceFlowError::not_found("Job", id)),
        }
    }
}
