//! Flow version service
//!
//! Entry point for editing flow versions: validates incoming operations,
//! runs them through the operation engine and persists the result. Also
//! pins piece versions on publish and serves versions for export.

use super::migration::FlowVersionMigrationService;
use super::validation::{FlowValidator, ValidationScope};
use crate::flow::connections::{collect_connection_ids, strip_step_connections, strip_step_sample_data};
use crate::flow::operations::{self, FlowOperation, ImportFlowRequest};
use crate::flow::structure::{get_all_steps, transfer_flow};
use crate::model::{FlowVersion, FlowVersionState};
use crate::piece::{PieceMetadataProvider, PieceQuery};
use crate::storage::{FlowVersionRepository, SeekPage, Storage, clamp_limit};
use crate::telemetry::OperationTimer;
use crate::{PieceFlowError, Result};
use chrono::Utc;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Inputs of [`FlowVersionService::apply_operation`]
pub struct ApplyOperationParams<'a> {
    pub flow_version: &'a FlowVersion,
    pub project_id: &'a str,
    pub platform_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub operation: FlowOperation,
    /// Caller-owned transaction; the service's storage is used when absent
    pub transaction: Option<&'a dyn FlowVersionRepository>,
}

/// What to remove from a version served for export
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub remove_connections: bool,
    pub remove_sample_data: bool,
}

#[derive(Clone)]
pub struct FlowVersionService {
    storage: Arc<dyn Storage>,
    validator: FlowValidator,
    migrations: FlowVersionMigrationService,
}

impl FlowVersionService {
    pub fn new(storage: Arc<dyn Storage>, pieces: Arc<dyn PieceMetadataProvider>) -> Self {
        Self {
            migrations: FlowVersionMigrationService::new(storage.clone()),
            validator: FlowValidator::new(pieces),
            storage,
        }
    }

    pub fn validator(&self) -> &FlowValidator {
        &self.validator
    }

    /// Validate and apply one user operation, then persist the result
    ///
    /// USE_AS_DRAFT is rewritten to IMPORT_FLOW of the referenced version and
    /// LOCK_FLOW pins piece versions first. Only a valid version can be
    /// locked, and locking a LOCKED version returns it unchanged. Editing a
    /// LOCKED version forks a fresh DRAFT; the locked row is left untouched.
    #[tracing::instrument(
        skip_all,
        fields(
            flow_id = %params.flow_version.flow_id,
            flow_version_id = %params.flow_version.id,
            operation = %params.operation.operation_type(),
        )
    )]
    pub async fn apply_operation(&self, params: ApplyOperationParams<'_>) -> Result<FlowVersion> {
        let timer = OperationTimer::start(params.operation.operation_type().as_str());
        let result = self.apply_operation_inner(params).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, code = e.code(), "Flow operation rejected");
        }
        timer.finish(&result);
        result
    }

    async fn apply_operation_inner(&self, params: ApplyOperationParams<'_>) -> Result<FlowVersion> {
        let scope = ValidationScope {
            project_id: Some(params.project_id),
            platform_id: params.platform_id,
        };
        let mut base = params.flow_version.clone();

        // publishing a published version is a no-op
        if base.is_locked() && matches!(params.operation, FlowOperation::LockFlow(_)) {
            tracing::debug!("Flow version already locked");
            return Ok(base);
        }

        let operation = match params.operation {
            FlowOperation::UseAsDraft(req) => {
                let source = self.find_one_or_throw(params.transaction, req.version_id).await?;
                if source.flow_id != base.flow_id {
                    return Err(PieceFlowError::not_found(
                        "FlowVersion",
                        req.version_id.to_string(),
                    ));
                }
                let source = self
                    .migrations
                    .migrate_in(source, params.transaction)
                    .await?;
                FlowOperation::ImportFlow(ImportFlowRequest {
                    display_name: source.display_name,
                    trigger: source.trigger,
                    schema_version: source.schema_version,
                })
            }
            FlowOperation::LockFlow(req) => {
                base = self.lock_piece_versions(scope, &base).await?;
                if !get_all_steps(&base.trigger).iter().all(|step| step.valid()) {
                    return Err(PieceFlowError::validation(format!(
                        "Flow version {} has invalid steps and cannot be published",
                        base.id
                    )));
                }
                FlowOperation::LockFlow(req)
            }
            other => other,
        };

        if base.is_locked() && !matches!(operation, FlowOperation::LockFlow(_)) {
            base = fork_draft(&base);
            tracing::info!(
                locked_version_id = %params.flow_version.id,
                draft_version_id = %base.id,
                "Forked draft from locked flow version"
            );
        }

        let prepared = self.validator.prepare_request(scope, &operation).await?;
        let mut next = operations::apply(&base, &prepared)?;
        next.updated = Utc::now();
        next.updated_by = params.user_id.map(str::to_string);

        self.save(params.transaction, &next).await?;
        Ok(next)
    }

    /// Pin every piece step to the concrete version the registry resolves now
    ///
    /// Versions that are already LOCKED are returned unchanged. Only
    /// `pieceVersion` of piece-backed steps changes.
    #[tracing::instrument(skip_all, fields(flow_version_id = %version.id))]
    pub async fn lock_piece_versions(
        &self,
        scope: ValidationScope<'_>,
        version: &FlowVersion,
    ) -> Result<FlowVersion> {
        if version.state == FlowVersionState::Locked {
            return Ok(version.clone());
        }

        let lookups = get_all_steps(&version.trigger)
            .into_iter()
            .filter_map(|step| step.piece().map(|piece| (step.name(), piece)))
            .map(|(step_name, (piece_name, piece_version))| async move {
                let query = PieceQuery::new(piece_name, piece_version)
                    .with_project(scope.project_id, scope.platform_id);
                let piece = self.validator.pieces().get_or_throw(&query).await?;
                Ok::<_, PieceFlowError>((step_name.to_string(), piece.version.clone()))
            });
        let pinned: HashMap<String, String> = try_join_all(lookups).await?.into_iter().collect();

        let locked = transfer_flow(version, |mut step| {
            let Some(resolved) = pinned.get(step.name()).cloned() else {
                return;
            };
            if let Some(piece_version) = step.piece_version_mut() {
                *piece_version = resolved;
            }
        });
        tracing::debug!(pinned = pinned.len(), "Pinned piece versions");
        Ok(locked)
    }

    /// Fetch a version of `flow_id`, migrated to the latest schema
    ///
    /// `version_id = None` selects the newest version of the flow. A version
    /// that belongs to another flow is reported as not found.
    #[tracing::instrument(skip(self))]
    pub async fn get_flow_version_or_throw(
        &self,
        flow_id: Uuid,
        version_id: Option<Uuid>,
        options: ExportOptions,
    ) -> Result<FlowVersion> {
        let found = match version_id {
            Some(id) => self
                .storage
                .find_one(id)
                .await?
                .filter(|version| version.flow_id == flow_id),
            None => self.storage.latest_for_flow(flow_id).await?,
        };
        let version = found.ok_or_else(|| {
            PieceFlowError::not_found(
                "FlowVersion",
                version_id.map_or_else(|| format!("latest of flow {}", flow_id), |id| id.to_string()),
            )
        })?;

        let version = self.migrations.migrate(version).await?;
        Ok(export_version(&version, options))
    }

    /// Fetch one version by id, migrated to the latest schema
    pub async fn get_one(&self, id: Uuid) -> Result<Option<FlowVersion>> {
        match self.storage.find_one(id).await? {
            Some(version) => Ok(Some(self.migrations.migrate(version).await?)),
            None => Ok(None),
        }
    }

    /// Seed a new DRAFT with an EMPTY trigger
    #[tracing::instrument(skip(self, transaction))]
    pub async fn create_empty_version(
        &self,
        flow_id: Uuid,
        display_name: &str,
        transaction: Option<&dyn FlowVersionRepository>,
    ) -> Result<FlowVersion> {
        let version = FlowVersion::new_empty(flow_id, display_name);
        self.save(transaction, &version).await?;
        tracing::info!(flow_version_id = %version.id, "Created empty flow version");
        Ok(version)
    }

    /// Version history of a flow, newest first
    pub async fn list(
        &self,
        flow_id: Uuid,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<SeekPage<FlowVersion>> {
        let page = self.storage.list(flow_id, cursor, clamp_limit(limit)).await?;
        let mut data = Vec::with_capacity(page.data.len());
        for version in page.data {
            data.push(self.migrations.migrate(version).await?);
        }
        Ok(SeekPage {
            data,
            next: page.next,
            previous: page.previous,
        })
    }

    async fn find_one_or_throw(
        &self,
        transaction: Option<&dyn FlowVersionRepository>,
        id: Uuid,
    ) -> Result<FlowVersion> {
        match transaction {
            Some(tx) => tx.find_one_or_throw(id).await,
            None => self.storage.find_one_or_throw(id).await,
        }
    }

    async fn save(
        &self,
        transaction: Option<&dyn FlowVersionRepository>,
        version: &FlowVersion,
    ) -> Result<()> {
        match transaction {
            Some(tx) => tx.save(version).await,
            None => self.storage.save(version).await,
        }
    }
}

/// A DRAFT copy of a locked version under a new id
fn fork_draft(locked: &FlowVersion) -> FlowVersion {
    let now = Utc::now();
    let mut draft = locked.clone();
    draft.id = Uuid::new_v4();
    draft.state = FlowVersionState::Draft;
    draft.created = now;
    draft.updated = now;
    draft
}

/// Copy of `version` with connection references and/or sample data removed
pub fn export_version(version: &FlowVersion, options: ExportOptions) -> FlowVersion {
    let mut exported = version.clone();
    if options.remove_connections {
        exported = transfer_flow(&exported, strip_step_connections);
        exported.connection_ids = collect_connection_ids(&exported.trigger);
    }
    if options.remove_sample_data {
        exported = transfer_flow(&exported, strip_step_sample_data);
    }
    exported
}
