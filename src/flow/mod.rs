//! Flow document handling
//!
//! Pure functions over flow versions: traversal, structural edits, connection
//! references and schema migrations. Nothing here performs I/O.

pub mod connections;
pub mod migrations;
pub mod operations;
pub mod structure;

pub use operations::{FlowOperation, FlowOperationType, StepLocation};
