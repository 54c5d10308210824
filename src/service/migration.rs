//! Read-path schema migration
//!
//! Versions written under an older schema are upgraded when they are read.
//! Only the migrated fields are written back.

use crate::constants::LATEST_SCHEMA_VERSION;
use crate::flow::migrations;
use crate::model::FlowVersion;
use crate::storage::{FlowVersionRepository, Storage};
use crate::{Result, telemetry};
use std::sync::Arc;

#[derive(Clone)]
pub struct FlowVersionMigrationService {
    storage: Arc<dyn Storage>,
}

impl FlowVersionMigrationService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Bring `version` to the latest schema, persisting the upgrade
    ///
    /// A version that is already current is returned as is, without a write.
    pub async fn migrate(&self, version: FlowVersion) -> Result<FlowVersion> {
        self.migrate_in(version, None).await
    }

    /// Like [`Self::migrate`], writing the upgrade through `transaction` when
    /// one is given
    #[tracing::instrument(skip_all, fields(flow_version_id = %version.id))]
    pub async fn migrate_in(
        &self,
        version: FlowVersion,
        transaction: Option<&dyn FlowVersionRepository>,
    ) -> Result<FlowVersion> {
        // newer schemas fall through so `apply` reports them
        if version.effective_schema_version() == LATEST_SCHEMA_VERSION {
            telemetry::record_migration("current");
            return Ok(version);
        }

        let from = version.effective_schema_version();
        let migrated = match migrations::apply(&version) {
            Ok(migrated) => migrated,
            Err(e) => {
                telemetry::record_migration("failed");
                tracing::error!(error = %e, "Flow version migration failed");
                return Err(e);
            }
        };

        match transaction {
            Some(tx) => tx.update_migrated_fields(&migrated).await?,
            None => self.storage.update_migrated_fields(&migrated).await?,
        }
        telemetry::record_migration("migrated");
        tracing::info!(
            from,
            to = migrated.effective_schema_version(),
            "Migrated flow version"
        );
        Ok(migrated)
    }
}
