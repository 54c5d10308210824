//! Error types for Pieceflow
//!
//! This module provides the error hierarchy using thiserror.
//! Step validity problems are never represented here: an invalid step is
//! recorded as `valid = false` on the step itself and returned normally.

use thiserror::Error;

/// Main error type for Pieceflow operations
#[derive(Error, Debug)]
pub enum PieceFlowError {
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: String },

    #[error("Flow form not found for flow {0}")]
    FlowFormNotFound(String),

    #[error("Piece trigger not found: {piece}/{trigger}")]
    PieceTriggerNotFound { piece: String, trigger: String },

    #[error("Piece not found: {name}@{version}")]
    PieceNotFound { name: String, version: String },

    #[error("Flow validation failed: {0}")]
    Validation(String),

    #[error("Invalid piece version: {0}")]
    InvalidPieceVersion(String),

    #[error("Flow version {id} is locked and cannot be edited")]
    FlowVersionLocked { id: String },

    #[error("Migration failed for flow version {id}: {message}")]
    Migration { id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<sqlx::Error> for PieceFlowError {
    fn from(err: sqlx::Error) -> Self {
        PieceFlowError::Storage(StorageError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for PieceFlowError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PieceFlowError::Storage(StorageError::Database(format!(
            "Failed to run migrations: {}",
            err
        )))
    }
}

impl From<uuid::Error> for PieceFlowError {
    fn from(err: uuid::Error) -> Self {
        PieceFlowError::Storage(StorageError::UuidParse(err))
    }
}

impl From<semver::Error> for PieceFlowError {
    fn from(err: semver::Error) -> Self {
        PieceFlowError::InvalidPieceVersion(err.to_string())
    }
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<reqwest::Error> for PieceFlowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PieceFlowError::Network(NetworkError::Timeout)
        } else {
            PieceFlowError::Network(NetworkError::Reqwest(err))
        }
    }
}

/// Convenient result type for Pieceflow operations
pub type Result<T> = std::result::Result<T, PieceFlowError>;

impl PieceFlowError {
    /// Create an entity-not-found error
    #[inline]
    pub fn not_found<S: Into<String>>(entity: &'static str, id: S) -> Self {
        PieceFlowError::EntityNotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PieceFlowError::Validation(msg.into())
    }

    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PieceFlowError::Config(msg.into())
    }

    /// Create a storage error
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PieceFlowError::Storage(StorageError::Database(msg.into()))
    }

    /// Create a scheduler error
    #[inline]
    pub fn scheduler<S: Into<String>>(msg: S) -> Self {
        PieceFlowError::Scheduler(msg.into())
    }

    /// Create a migration error
    #[inline]
    pub fn migration<S: Into<String>>(id: S, message: S) -> Self {
        PieceFlowError::Migration {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used by controller layers to pick a
    /// response class (404 for the `*_NOT_FOUND` family).
    pub fn code(&self) -> &'static str {
        match self {
            PieceFlowError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            PieceFlowError::FlowFormNotFound(_) => "FLOW_FORM_NOT_FOUND",
            PieceFlowError::PieceTriggerNotFound { .. } => "PIECE_TRIGGER_NOT_FOUND",
            PieceFlowError::PieceNotFound { .. } => "PIECE_NOT_FOUND",
            PieceFlowError::Validation(_) => "VALIDATION",
            PieceFlowError::InvalidPieceVersion(_) => "INVALID_PIECE_VERSION",
            PieceFlowError::FlowVersionLocked { .. } => "FLOW_IS_LOCKED",
            PieceFlowError::Migration { .. } => "MIGRATION_FAILED",
            PieceFlowError::Storage(_) => "STORAGE",
            PieceFlowError::Network(_) => "NETWORK",
            PieceFlowError::Scheduler(_) => "SCHEDULER",
            PieceFlowError::Config(_) => "CONFIG",
            PieceFlowError::Io(_) => "IO",
            PieceFlowError::Json(_) | PieceFlowError::Yaml(_) => "SERIALIZATION",
            PieceFlowError::Other(_) => "INTERNAL",
        }
    }

    /// Whether this error belongs to the not-found family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PieceFlowError::EntityNotFound { .. }
                | PieceFlowError::FlowFormNotFound(_)
                | PieceFlowError::PieceTriggerNotFound { .. }
                | PieceFlowError::PieceNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_codes() {
        let err = PieceFlowError::not_found("FlowVersion", "abc");
        assert_eq!(err.code(), "ENTITY_NOT_FOUND");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "FlowVersion not found: abc");

        let err = PieceFlowError::PieceTriggerNotFound {
            piece: "@x/y".to_string(),
            trigger: "new_row".to_string(),
        };
        assert_eq!(err.code(), "PIECE_TRIGGER_NOT_FOUND");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_is_not_not_found() {
        let err = PieceFlowError::validation("duplicate step name");
        assert_eq!(err.code(), "VALIDATION");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_semver_errors_are_invalid_piece_versions() {
        let err: PieceFlowError = semver::VersionReq::parse("not a range").unwrap_err().into();
        assert_eq!(err.code(), "INVALID_PIECE_VERSION");
        assert!(err.to_string().starts_with("Invalid piece version: "));
    }
}
