//! Flow version services
//!
//! Stateful entry points over the pure `flow` functions: validation against
//! the piece registry, persisted edits, publishing and read-path migration.

pub mod flow_version;
pub mod migration;
pub mod validation;

pub use flow_version::{ApplyOperationParams, ExportOptions, FlowVersionService, export_version};
pub use migration::FlowVersionMigrationService;
pub use validation::{FlowValidator, ValidationScope};

#[cfg(test)]
mod flow_version_test;
