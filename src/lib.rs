//! Pieceflow - flow version editing core
//!
//! This library holds the editing side of a piece-based automation platform:
//! - Structural operations over a flow version's step tree
//! - Validation of piece-backed steps against their declared props
//! - Piece version locking and read-path schema migration
//! - Trigger lifecycle (polling, webhooks, app events) with job recovery
//!
//! # Example
//!
//! ```rust,no_run
//! use pieceflow::config::Config;
//! use pieceflow::flow::operations::{ChangeNameRequest, FlowOperation};
//! use pieceflow::piece::create_piece_provider;
//! use pieceflow::service::{ApplyOperationParams, FlowVersionService};
//! use pieceflow::storage::create_storage_from_config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let storage = create_storage_from_config(&config.storage).await?;
//!     let pieces = create_piece_provider(&config.pieces).await?;
//!     let service = FlowVersionService::new(storage, pieces);
//!
//!     let draft = service
//!         .create_empty_version(uuid::Uuid::new_v4(), "My flow", None)
//!         .await?;
//!     let renamed = service
//!         .apply_operation(ApplyOperationParams {
//!             flow_version: &draft,
//!             project_id: "project",
//!             platform_id: None,
//!             user_id: None,
//!             operation: FlowOperation::ChangeName(ChangeNameRequest {
//!                 display_name: "Renamed".to_string(),
//!             }),
//!             transaction: None,
//!         })
//!         .await?;
//!     println!("{}", renamed.display_name);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Flow documents
pub mod flow;
pub mod piece;
pub mod service;
pub mod trigger;

// Infrastructure
pub mod cli;
pub mod config;
pub mod storage;
pub mod telemetry;

// Re-exports for convenience
pub use error::{PieceFlowError, Result};
pub use flow::FlowOperation;
pub use model::{FlowAction, FlowTrigger, FlowVersion, FlowVersionState, TriggerSource};
pub use service::{FlowVersionMigrationService, FlowVersionService};
pub use trigger::TriggerHooks;

/// Initialize logging for the application
///
/// `RUST_LOG` wins over the configured level. Calling this more than once
/// keeps the first subscriber.
pub fn init_logging(log: &config::LogConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let directive = log.level.as_deref().unwrap_or("info");
            if directive.contains('=') {
                EnvFilter::try_new(directive)
            } else {
                EnvFilter::try_new(format!("pieceflow={}", directive))
            }
        })
        .unwrap_or_else(|_| "pieceflow=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if log.is_json() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}
