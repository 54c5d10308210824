//! Recovery backfills run at process start

use super::{JobData, JobSpec, JobType, TriggerHooks, parse_cron};
use crate::constants::{FLOW_JOB_BACKFILL_MARKER, TRIGGER_SOURCE_PAGE_SIZE};
use crate::model::{ScheduleOptions, TriggerSource, TriggerStrategy};
use crate::piece::PieceQuery;
use crate::{PieceFlowError, Result, telemetry};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of one backfill run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// Records inspected
    pub scanned: usize,
    /// Jobs added or updated
    pub scheduled: usize,
    /// Records left alone
    pub skipped: usize,
}

impl TriggerHooks {
    /// Re-enqueue the recurring job of every live trigger source
    ///
    /// Jobs are keyed by flow version, so running this against a queue that
    /// already holds them changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn refill_polling_jobs(&self) -> Result<RefillReport> {
        let mut report = RefillReport::default();
        let mut offset = 0;

        loop {
            let page = self
                .storage
                .list_active(offset, TRIGGER_SOURCE_PAGE_SIZE)
                .await?;
            let fetched = page.len();

            for source in page {
                report.scanned += 1;
                match self.refill_source(&source).await {
                    Ok(true) => report.scheduled += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        report.skipped += 1;
                        tracing::warn!(
                            trigger_source_id = %source.id,
                            flow_version_id = %source.flow_version_id,
                            error = %e,
                            "Could not refill trigger job"
                        );
                    }
                }
            }

            if fetched < TRIGGER_SOURCE_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        telemetry::record_refilled_jobs("polling", report.scheduled);
        tracing::info!(
            scanned = report.scanned,
            scheduled = report.scheduled,
            "Refilled trigger jobs"
        );
        Ok(report)
    }

    /// Returns whether a job was (re)added
    async fn refill_source(&self, source: &TriggerSource) -> Result<bool> {
        if source.simulate {
            return Ok(false);
        }

        let data = JobData {
            project_id: source.project_id.clone(),
            flow_version_id: source.flow_version_id,
            flow_id: Some(source.flow_id),
            payload: None,
        };

        let job = match source.strategy {
            TriggerStrategy::Polling => JobSpec {
                id: JobSpec::polling_id(source.flow_version_id),
                job_type: JobType::ExecutePolling,
                data,
                schedule: Some(
                    source
                        .schedule
                        .clone()
                        .unwrap_or_else(|| self.settings.default_polling_schedule()),
                ),
            },
            TriggerStrategy::Webhook => {
                let Some(schedule) = self.current_renewal(source).await? else {
                    return Ok(false);
                };
                JobSpec {
                    id: JobSpec::renew_webhook_id(source.flow_version_id),
                    job_type: JobType::RenewWebhook,
                    data,
                    schedule: Some(schedule),
                }
            }
            TriggerStrategy::AppWebhook => return Ok(false),
        };

        self.queue.add(job).await?;
        Ok(true)
    }

    /// Renewal cadence the piece declares today, in the source's timezone
    async fn current_renewal(&self, source: &TriggerSource) -> Result<Option<ScheduleOptions>> {
        let query = PieceQuery::new(&source.piece_name, &source.piece_version)
            .with_project(Some(&source.project_id), None);
        let piece = self.pieces.get_or_throw(&query).await?;
        let trigger = piece.triggers.get(&source.trigger_name).ok_or_else(|| {
            PieceFlowError::PieceTriggerNotFound {
                piece: source.piece_name.clone(),
                trigger: source.trigger_name.clone(),
            }
        })?;
        let Some(cron) = trigger.renewal_cron() else {
            return Ok(None);
        };
        parse_cron(cron)?;
        let timezone = source
            .schedule
            .as_ref()
            .map_or(self.settings.polling_timezone.as_str(), |s| s.timezone.as_str());
        Ok(Some(ScheduleOptions::new(cron, timezone)))
    }

    /// Fill in `flowId` on pending execute-flow jobs, once
    ///
    /// Runs in windows of `batch_size` jobs; the flow versions of a window
    /// are fetched in one lookup and its updates run concurrently. A marker
    /// records completion so later starts skip the scan.
    #[tracing::instrument(skip(self))]
    pub async fn refill_execute_flow_jobs(&self, batch_size: usize) -> Result<RefillReport> {
        if let Some(done_at) = self.storage.get_marker(FLOW_JOB_BACKFILL_MARKER).await? {
            tracing::debug!(%done_at, "Execute-flow job backfill already done");
            return Ok(RefillReport::default());
        }

        let batch_size = batch_size.max(1);
        let mut report = RefillReport::default();
        let mut offset = 0;

        loop {
            let batch = self
                .queue
                .list_pending(JobType::ExecuteFlow, offset, batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len();
            report.scanned += fetched;

            let missing: Vec<JobSpec> = batch
                .into_iter()
                .filter(|job| job.data.flow_id.is_none())
                .collect();
            report.skipped += fetched - missing.len();

            let version_ids: Vec<Uuid> = missing.iter().map(|job| job.data.flow_version_id).collect();
            let flow_ids: HashMap<Uuid, Uuid> = self
                .storage
                .find_by_ids(&version_ids)
                .await?
                .into_iter()
                .map(|version| (version.id, version.flow_id))
                .collect();

            let (resolvable, orphaned): (Vec<JobSpec>, Vec<JobSpec>) = missing
                .into_iter()
                .partition(|job| flow_ids.contains_key(&job.data.flow_version_id));
            // jobs whose flow version no longer exists
            report.skipped += orphaned.len();

            let updates = resolvable.into_iter().map(|job| {
                let flow_id = flow_ids.get(&job.data.flow_version_id).copied();
                async move {
                    let data = JobData { flow_id, ..job.data };
                    self.queue.update_data(&job.id, data).await
                }
            });
            for result in join_all(updates).await {
                match result {
                    Ok(()) => report.scheduled += 1,
                    Err(e) => {
                        report.skipped += 1;
                        tracing::warn!(error = %e, "Failed to backfill execute-flow job");
                    }
                }
            }

            if fetched < batch_size {
                break;
            }
            offset += fetched;
        }

        self.storage
            .set_marker(FLOW_JOB_BACKFILL_MARKER, &Utc::now().to_rfc3339())
            .await?;
        telemetry::record_refilled_jobs("execute_flow", report.scheduled);
        tracing::info!(
            scanned = report.scanned,
            updated = report.scheduled,
            "Backfilled flow id on execute-flow jobs"
        );
        Ok(report)
    }
}
