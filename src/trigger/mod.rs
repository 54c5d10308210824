//! Trigger lifecycle
//!
//! Enables and disables the live side of a flow version's trigger: webhook
//! subscriptions, recurring polling jobs, webhook renewals and app-event
//! listeners. Every live registration is mirrored by a [`TriggerSource`].

pub mod queue;
pub mod refill;

pub use queue::{InMemoryJobQueue, JobData, JobQueue, JobSpec, JobType, next_run, parse_cron};
pub use refill::RefillReport;

use crate::config::TriggersConfig;
use crate::constants::{DEFAULT_POLLING_CRON, DEFAULT_TIMEZONE, DEFAULT_WEBHOOK_BASE_URL};
use crate::model::{
    FlowVersion, PieceMetadata, PieceTriggerSettings, ScheduleOptions, TriggerKind,
    TriggerMetadata, TriggerSource, TriggerStrategy,
};
use crate::piece::{PieceMetadataProvider, PieceQuery};
use crate::storage::Storage;
use crate::{PieceFlowError, Result, telemetry};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Scheduling defaults of the trigger controller
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSettings {
    pub polling_cron_expression: String,
    pub polling_timezone: String,
    pub webhook_base_url: String,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            polling_cron_expression: DEFAULT_POLLING_CRON.to_string(),
            polling_timezone: DEFAULT_TIMEZONE.to_string(),
            webhook_base_url: DEFAULT_WEBHOOK_BASE_URL.to_string(),
        }
    }
}

impl From<&TriggersConfig> for TriggerSettings {
    fn from(config: &TriggersConfig) -> Self {
        Self {
            polling_cron_expression: config.polling_cron_expression.clone(),
            polling_timezone: config.polling_timezone.clone(),
            webhook_base_url: config.webhook_base_url.clone(),
        }
    }
}

impl TriggerSettings {
    /// `<base>/v1/webhooks/<flowId>`, with `/simulate` appended in simulate mode
    pub fn webhook_url(&self, flow_id: Uuid, simulate: bool) -> String {
        let base = self.webhook_base_url.trim_end_matches('/');
        if simulate {
            format!("{}/v1/webhooks/{}/simulate", base, flow_id)
        } else {
            format!("{}/v1/webhooks/{}", base, flow_id)
        }
    }

    fn default_polling_schedule(&self) -> ScheduleOptions {
        ScheduleOptions::new(&self.polling_cron_expression, &self.polling_timezone)
    }
}

/// App event subscription requested by an APP_WEBHOOK trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventListener {
    pub app_name: String,
    pub events: Vec<String>,
    pub identifier_value: String,
}

/// What a piece trigger asked for when it was enabled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnableHookOutput {
    pub listeners: Vec<AppEventListener>,
    /// Polling cadence chosen by the trigger or its user
    pub schedule: Option<ScheduleOptions>,
}

/// Everything a piece trigger hook gets to see
#[derive(Debug, Clone, Copy)]
pub struct TriggerHookContext<'a> {
    pub flow_version: &'a FlowVersion,
    pub project_id: &'a str,
    pub piece: &'a PieceMetadata,
    pub trigger: &'a TriggerMetadata,
    pub settings: &'a PieceTriggerSettings,
    pub webhook_url: &'a str,
    pub simulate: bool,
}

/// Runs a piece trigger's own onEnable/onDisable hooks
#[async_trait]
pub trait TriggerHookExecutor: Send + Sync {
    async fn on_enable(&self, ctx: TriggerHookContext<'_>) -> Result<EnableHookOutput>;

    async fn on_disable(&self, ctx: TriggerHookContext<'_>) -> Result<()>;
}

/// Executor for triggers whose hooks have nothing to do
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHookExecutor;

#[async_trait]
impl TriggerHookExecutor for NoopHookExecutor {
    async fn on_enable(&self, _ctx: TriggerHookContext<'_>) -> Result<EnableHookOutput> {
        Ok(EnableHookOutput::default())
    }

    async fn on_disable(&self, _ctx: TriggerHookContext<'_>) -> Result<()> {
        Ok(())
    }
}

type RouteKey = (String, String, String);

/// Registered app-event listener of one trigger source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppEventRoute {
    pub flow_id: Uuid,
    pub flow_version_id: Uuid,
    pub project_id: String,
    pub simulate: bool,
}

/// Routes incoming app events to the flows listening for them
///
/// Keyed by `(appName, event, identifierValue)`. A flow version may listen
/// twice, once live and once in simulate mode.
pub struct AppEventRouting {
    routes: Arc<RwLock<HashMap<RouteKey, HashSet<AppEventRoute>>>>,
}

impl AppEventRouting {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, route: &AppEventRoute, listener: &AppEventListener) {
        let mut routes = self.routes.write();
        for event in &listener.events {
            routes
                .entry((
                    listener.app_name.clone(),
                    event.clone(),
                    listener.identifier_value.clone(),
                ))
                .or_default()
                .insert(route.clone());
        }
    }

    /// Drop the routes of one trigger source; returns how many were removed
    pub fn remove_source(&self, flow_version_id: Uuid, simulate: bool) -> usize {
        let mut routes = self.routes.write();
        let mut removed = 0;
        routes.retain(|_, flows| {
            let before = flows.len();
            flows.retain(|route| {
                route.flow_version_id != flow_version_id || route.simulate != simulate
            });
            removed += before - flows.len();
            !flows.is_empty()
        });
        removed
    }

    pub fn lookup(&self, app_name: &str, event: &str, identifier_value: &str) -> Vec<AppEventRoute> {
        let routes = self.routes.read();
        let key = (
            app_name.to_string(),
            event.to_string(),
            identifier_value.to_string(),
        );
        let mut found: Vec<AppEventRoute> = routes
            .get(&key)
            .map(|flows| flows.iter().cloned().collect())
            .unwrap_or_default();
        found.sort_by_key(|route| (route.flow_id, route.flow_version_id, route.simulate));
        found
    }
}

impl Default for AppEventRouting {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger lifecycle controller
pub struct TriggerHooks {
    storage: Arc<dyn Storage>,
    pieces: Arc<dyn PieceMetadataProvider>,
    executor: Arc<dyn TriggerHookExecutor>,
    queue: Arc<dyn JobQueue>,
    routing: Arc<AppEventRouting>,
    settings: TriggerSettings,
}

impl TriggerHooks {
    pub fn new(
        storage: Arc<dyn Storage>,
        pieces: Arc<dyn PieceMetadataProvider>,
        executor: Arc<dyn TriggerHookExecutor>,
        queue: Arc<dyn JobQueue>,
        settings: TriggerSettings,
    ) -> Self {
        Self {
            storage,
            pieces,
            executor,
            queue,
            routing: Arc::new(AppEventRouting::new()),
            settings,
        }
    }

    pub fn routing(&self) -> &Arc<AppEventRouting> {
        &self.routing
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// Bring the trigger of `flow_version` live
    ///
    /// Returns `None` for EMPTY triggers. Enabling an already enabled version
    /// returns its existing source.
    #[tracing::instrument(
        skip(self, flow_version),
        fields(flow_id = %flow_version.flow_id, flow_version_id = %flow_version.id)
    )]
    pub async fn enable(
        &self,
        flow_version: &FlowVersion,
        project_id: &str,
        simulate: bool,
    ) -> Result<Option<TriggerSource>> {
        let TriggerKind::Piece { settings } = &flow_version.trigger.kind else {
            tracing::debug!("EMPTY trigger, nothing to enable");
            return Ok(None);
        };

        if let Some(existing) = self
            .storage
            .find_active_by_flow_version(flow_version.id, simulate)
            .await?
        {
            tracing::debug!(trigger_source_id = %existing.id, "Trigger already enabled");
            return Ok(Some(existing));
        }

        let (piece, trigger) = self.resolve_trigger(settings, project_id).await?;
        let strategy = trigger.strategy;
        let result = self
            .enable_strategy(flow_version, project_id, simulate, settings, &piece, &trigger)
            .await;
        let status = if result.is_ok() { "success" } else { "failure" };
        telemetry::record_trigger_transition(strategy.as_str(), "enable", status);
        let schedule = result?;

        let now = Utc::now().trunc_subsecs(3);
        let source = TriggerSource {
            id: Uuid::new_v4(),
            flow_id: flow_version.flow_id,
            flow_version_id: flow_version.id,
            project_id: project_id.to_string(),
            piece_name: piece.name.clone(),
            piece_version: piece.version.clone(),
            trigger_name: trigger.name.clone(),
            strategy,
            schedule,
            simulate,
            created: now,
            updated: now,
            deleted: None,
        };
        self.storage.save_trigger_source(&source).await?;

        tracing::info!(
            strategy = strategy.as_str(),
            piece_name = %source.piece_name,
            simulate,
            "Enabled trigger"
        );
        Ok(Some(source))
    }

    /// Run the piece hook and register whatever the strategy needs
    ///
    /// Returns the schedule to persist on the trigger source.
    async fn enable_strategy(
        &self,
        flow_version: &FlowVersion,
        project_id: &str,
        simulate: bool,
        settings: &PieceTriggerSettings,
        piece: &PieceMetadata,
        trigger: &TriggerMetadata,
    ) -> Result<Option<ScheduleOptions>> {
        let webhook_url = self.settings.webhook_url(flow_version.flow_id, simulate);
        let output = self
            .executor
            .on_enable(TriggerHookContext {
                flow_version,
                project_id,
                piece,
                trigger,
                settings,
                webhook_url: &webhook_url,
                simulate,
            })
            .await?;

        let data = JobData {
            project_id: project_id.to_string(),
            flow_version_id: flow_version.id,
            flow_id: Some(flow_version.flow_id),
            payload: None,
        };

        match trigger.strategy {
            TriggerStrategy::Webhook => {
                let Some(cron) = trigger.renewal_cron() else {
                    return Ok(None);
                };
                let schedule = ScheduleOptions::new(cron, &self.settings.polling_timezone);
                parse_cron(&schedule.cron_expression)?;
                if !simulate {
                    self.queue
                        .add(JobSpec {
                            id: JobSpec::renew_webhook_id(flow_version.id),
                            job_type: JobType::RenewWebhook,
                            data,
                            schedule: Some(schedule.clone()),
                        })
                        .await?;
                }
                Ok(Some(schedule))
            }
            TriggerStrategy::Polling => {
                let schedule = output
                    .schedule
                    .unwrap_or_else(|| self.settings.default_polling_schedule());
                parse_cron(&schedule.cron_expression)?;
                if !simulate {
                    self.queue
                        .add(JobSpec {
                            id: JobSpec::polling_id(flow_version.id),
                            job_type: JobType::ExecutePolling,
                            data,
                            schedule: Some(schedule.clone()),
                        })
                        .await?;
                }
                Ok(Some(schedule))
            }
            TriggerStrategy::AppWebhook => {
                let route = AppEventRoute {
                    flow_id: flow_version.flow_id,
                    flow_version_id: flow_version.id,
                    project_id: project_id.to_string(),
                    simulate,
                };
                for listener in &output.listeners {
                    self.routing.register(&route, listener);
                }
                tracing::debug!(listeners = output.listeners.len(), "Registered app listeners");
                Ok(None)
            }
        }
    }

    /// Take the trigger of `flow_version` down
    ///
    /// Hook and queue failures are logged and skipped; the trigger source is
    /// always soft-deleted.
    #[tracing::instrument(
        skip(self, flow_version),
        fields(flow_id = %flow_version.flow_id, flow_version_id = %flow_version.id)
    )]
    pub async fn disable(
        &self,
        flow_version: &FlowVersion,
        project_id: &str,
        simulate: bool,
    ) -> Result<()> {
        let Some(source) = self
            .storage
            .find_active_by_flow_version(flow_version.id, simulate)
            .await?
        else {
            tracing::debug!("No live trigger source, nothing to disable");
            return Ok(());
        };

        let mut status = "success";
        if let TriggerKind::Piece { settings } = &flow_version.trigger.kind {
            match self.resolve_trigger(settings, project_id).await {
                Ok((piece, trigger)) => {
                    let webhook_url = self.settings.webhook_url(flow_version.flow_id, simulate);
                    let hook = self
                        .executor
                        .on_disable(TriggerHookContext {
                            flow_version,
                            project_id,
                            piece: &piece,
                            trigger: &trigger,
                            settings,
                            webhook_url: &webhook_url,
                            simulate,
                        })
                        .await;
                    if let Err(e) = hook {
                        status = "failure";
                        tracing::warn!(error = %e, "Trigger onDisable hook failed");
                    }
                }
                Err(e) => {
                    status = "failure";
                    tracing::warn!(error = %e, "Skipping onDisable hook");
                }
            }
        }

        match source.strategy {
            TriggerStrategy::Polling => {
                self.remove_job(&JobSpec::polling_id(flow_version.id), &mut status)
                    .await
            }
            TriggerStrategy::Webhook => {
                self.remove_job(&JobSpec::renew_webhook_id(flow_version.id), &mut status)
                    .await
            }
            TriggerStrategy::AppWebhook => {
                let removed = self.routing.remove_source(flow_version.id, simulate);
                tracing::debug!(removed, "Removed app listeners");
            }
        }

        self.storage
            .soft_delete(source.id, Utc::now().trunc_subsecs(3))
            .await?;
        telemetry::record_trigger_transition(source.strategy.as_str(), "disable", status);
        tracing::info!(strategy = source.strategy.as_str(), simulate, "Disabled trigger");
        Ok(())
    }

    async fn remove_job(&self, id: &str, status: &mut &'static str) {
        if let Err(e) = self.queue.remove(id).await {
            *status = "failure";
            tracing::warn!(job_id = id, error = %e, "Failed to remove job");
        }
    }

    async fn resolve_trigger(
        &self,
        settings: &PieceTriggerSettings,
        project_id: &str,
    ) -> Result<(Arc<PieceMetadata>, TriggerMetadata)> {
        let query = PieceQuery::new(&settings.piece_name, &settings.piece_version)
            .with_project(Some(project_id), None);
        let piece = self.pieces.get_or_throw(&query).await?;
        let trigger_name = settings.trigger_name.as_deref().unwrap_or_default();
        let trigger = piece.triggers.get(trigger_name).cloned().ok_or_else(|| {
            PieceFlowError::PieceTriggerNotFound {
                piece: settings.piece_name.clone(),
                trigger: trigger_name.to_string(),
            }
        })?;
        Ok((piece, trigger))
    }
}

#[cfg(test)]
mod refill_test;
