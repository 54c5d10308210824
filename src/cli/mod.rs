//! Command-line interface for Pieceflow
//!
//! File commands read a flow version JSON document, run it through the same
//! services the library exposes and print the result as JSON.

use crate::config::Config;
use crate::flow::migrations;
use crate::flow::operations::{FlowOperation, ImportFlowRequest, LockFlowRequest};
use crate::flow::structure::get_all_steps;
use crate::model::FlowVersion;
use crate::piece::create_piece_provider;
use crate::service::{ApplyOperationParams, ExportOptions, FlowVersionService, export_version};
use crate::storage::{MemoryStorage, Storage, create_storage_from_config};
use crate::trigger::{InMemoryJobQueue, NoopHookExecutor, TriggerHooks, TriggerSettings};
use crate::{PieceFlowError, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "pieceflow",
    about = "Pieceflow - edit, validate, lock and export flow versions",
    version
)]
pub struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(long, global = true, default_value = crate::constants::CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Project the piece lookups are scoped to
    #[arg(long, global = true, default_value = "default")]
    pub project: String,

    /// Write the resulting document here instead of stdout
    #[arg(long, short, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate every step of a flow version
    Validate { flow: PathBuf },

    /// Apply one operation document to a flow version
    Apply { flow: PathBuf, operation: PathBuf },

    /// Pin piece versions and lock a flow version
    Lock { flow: PathBuf },

    /// Export a flow version, optionally stripped for sharing
    Export {
        flow: PathBuf,

        #[arg(long)]
        strip_connections: bool,

        #[arg(long)]
        strip_sample_data: bool,
    },

    /// Upgrade a flow version document to the latest schema
    Migrate { flow: PathBuf },

    /// Re-derive trigger jobs from the configured storage
    Refill,
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_path(&cli.config)?;
    config.apply_env_overrides();
    config.validate()?;
    crate::init_logging(&config.log);

    execute(cli, &config).await
}

/// Run one parsed command against `config`
pub async fn execute(cli: Cli, config: &Config) -> Result<()> {
    let output = cli.output.as_deref();
    match cli.command {
        Commands::Validate { flow } => {
            let service = file_service(config).await?;
            let version = load_version(&flow)?;
            let checked = apply(&service, &version, &cli.project, reimport(&version)).await?;
            let steps: Vec<_> = get_all_steps(&checked.trigger)
                .into_iter()
                .map(|step| json!({"name": step.name(), "valid": step.valid()}))
                .collect();
            emit(output, &json!({"valid": checked.valid, "steps": steps}))?;
            if !checked.valid {
                let invalid = get_all_steps(&checked.trigger)
                    .into_iter()
                    .filter(|step| !step.valid())
                    .map(|step| step.name())
                    .join(", ");
                return Err(PieceFlowError::validation(format!(
                    "Flow version {} has invalid steps: {}",
                    checked.id, invalid
                )));
            }
            Ok(())
        }
        Commands::Apply { flow, operation } => {
            let service = file_service(config).await?;
            let version = load_version(&flow)?;
            let operation: FlowOperation = read_json(&operation)?;
            let next = apply(&service, &version, &cli.project, operation).await?;
            emit(output, &next)
        }
        Commands::Lock { flow } => {
            let service = file_service(config).await?;
            let mut version = load_version(&flow)?;
            if !version.is_locked() {
                // validity in the file may be stale
                version = apply(&service, &version, &cli.project, reimport(&version)).await?;
            }
            let operation = FlowOperation::LockFlow(LockFlowRequest {
                flow_id: Some(version.flow_id),
            });
            let locked = apply(&service, &version, &cli.project, operation).await?;
            emit(output, &locked)
        }
        Commands::Export {
            flow,
            strip_connections,
            strip_sample_data,
        } => {
            let version = load_version(&flow)?;
            let options = ExportOptions {
                remove_connections: strip_connections,
                remove_sample_data: strip_sample_data,
            };
            emit(output, &export_version(&version, options))
        }
        Commands::Migrate { flow } => emit(output, &load_version(&flow)?),
        Commands::Refill => {
            let storage = create_storage_from_config(&config.storage).await?;
            let pieces = create_piece_provider(&config.pieces).await?;
            let hooks = TriggerHooks::new(
                storage,
                pieces,
                Arc::new(NoopHookExecutor),
                Arc::new(InMemoryJobQueue::new()),
                TriggerSettings::from(&config.triggers),
            );
            let polling = hooks.refill_polling_jobs().await?;
            let execute_flow = hooks
                .refill_execute_flow_jobs(config.migrations.batch_size)
                .await?;
            emit(
                output,
                &json!({
                    "polling": {
                        "scanned": polling.scanned,
                        "scheduled": polling.scheduled,
                        "skipped": polling.skipped,
                    },
                    "executeFlow": {
                        "scanned": execute_flow.scanned,
                        "updated": execute_flow.scheduled,
                        "skipped": execute_flow.skipped,
                    },
                }),
            )
        }
    }
}

/// Service over throwaway storage; the files are the source of truth
async fn file_service(config: &Config) -> Result<FlowVersionService> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let pieces = create_piece_provider(&config.pieces).await?;
    Ok(FlowVersionService::new(storage, pieces))
}

async fn apply(
    service: &FlowVersionService,
    version: &FlowVersion,
    project_id: &str,
    operation: FlowOperation,
) -> Result<FlowVersion> {
    service
        .apply_operation(ApplyOperationParams {
            flow_version: version,
            project_id,
            platform_id: None,
            user_id: None,
            operation,
            transaction: None,
        })
        .await
}

/// IMPORT_FLOW of the version onto itself, which revalidates every step
fn reimport(version: &FlowVersion) -> FlowOperation {
    FlowOperation::ImportFlow(ImportFlowRequest {
        display_name: version.display_name.clone(),
        trigger: version.trigger.clone(),
        schema_version: version.schema_version,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a flow version, upgraded to the latest schema
fn load_version(path: &Path) -> Result<FlowVersion> {
    let version: FlowVersion = read_json(path)?;
    if migrations::needs_migration(&version) {
        tracing::debug!(path = %path.display(), "Migrating flow version document");
        return migrations::apply(&version);
    }
    Ok(version)
}

fn emit<T: Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

#[cfg(test)]
mod cli_test;
