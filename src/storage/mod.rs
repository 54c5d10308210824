//! Storage backends for Pieceflow
//!
//! Repositories for flow versions, trigger sources and system markers, with
//! an in-memory backend and a SQLite backend sharing one trait interface.

pub mod memory;
pub mod sql_common;
pub mod sqlite;

use crate::error::StorageError;
use crate::model::{FlowVersion, TriggerSource};
use crate::{PieceFlowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use memory::MemoryStorage;
pub use sqlite::{SqliteStorage, SqliteTransaction};

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekPage<T> {
    pub data: Vec<T>,

    /// Cursor of the following (older) page
    pub next: Option<String>,

    /// Cursor of the preceding (newer) page
    pub previous: Option<String>,
}

impl<T> SeekPage<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            next: None,
            previous: None,
        }
    }
}

/// Position in a newest-first listing ordered by `(created, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Rows strictly older than the key
    Next { created_millis: i64, id: Uuid },
    /// Rows strictly newer than the key
    Previous { created_millis: i64, id: Uuid },
}

impl Cursor {
    pub fn next_after(version: &FlowVersion) -> Self {
        Cursor::Next {
            created_millis: version.created.timestamp_millis(),
            id: version.id,
        }
    }

    pub fn previous_before(version: &FlowVersion) -> Self {
        Cursor::Previous {
            created_millis: version.created.timestamp_millis(),
            id: version.id,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Cursor::Next { created_millis, id } => format!("next:{}:{}", created_millis, id),
            Cursor::Previous { created_millis, id } => format!("prev:{}:{}", created_millis, id),
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let invalid = || PieceFlowError::Storage(StorageError::InvalidCursor(raw.to_string()));
        let mut parts = raw.splitn(3, ':');
        let (Some(direction), Some(millis), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let created_millis: i64 = millis.parse().map_err(|_| invalid())?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        match direction {
            "next" => Ok(Cursor::Next { created_millis, id }),
            "prev" => Ok(Cursor::Previous { created_millis, id }),
            _ => Err(invalid()),
        }
    }
}

/// Build a newest-first page from rows fetched with one extra element
///
/// `rows` must be newest-first for `None`/`Next` cursors and oldest-first
/// for `Previous` cursors, holding up to `limit + 1` rows.
pub fn build_page(
    mut rows: Vec<FlowVersion>,
    cursor: Option<Cursor>,
    limit: usize,
) -> SeekPage<FlowVersion> {
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    match cursor {
        Some(Cursor::Previous { .. }) => {
            rows.reverse();
            let previous = has_more
                .then(|| rows.first().map(|v| Cursor::previous_before(v).encode()))
                .flatten();
            let next = rows.last().map(|v| Cursor::next_after(v).encode());
            SeekPage {
                data: rows,
                next,
                previous,
            }
        }
        Some(Cursor::Next { .. }) | None => {
            let next = has_more
                .then(|| rows.last().map(|v| Cursor::next_after(v).encode()))
                .flatten();
            let previous = cursor
                .and_then(|_| rows.first().map(|v| Cursor::previous_before(v).encode()));
            SeekPage {
                data: rows,
                next,
                previous,
            }
        }
    }
}

/// Flow version persistence
#[async_trait]
pub trait FlowVersionRepository: Send + Sync {
    async fn find_one(&self, id: Uuid) -> Result<Option<FlowVersion>>;

    async fn find_one_or_throw(&self, id: Uuid) -> Result<FlowVersion> {
        self.find_one(id)
            .await?
            .ok_or_else(|| PieceFlowError::not_found("FlowVersion", id.to_string()))
    }

    /// Versions with the given ids; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FlowVersion>>;

    /// Insert or fully replace a version
    async fn save(&self, version: &FlowVersion) -> Result<()>;

    /// Write only `schemaVersion`, `trigger`, `connectionIds` and `agentIds`
    async fn update_migrated_fields(&self, version: &FlowVersion) -> Result<()>;

    /// Version history of a flow, newest first
    async fn list(
        &self,
        flow_id: Uuid,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SeekPage<FlowVersion>>;

    async fn latest_for_flow(&self, flow_id: Uuid) -> Result<Option<FlowVersion>>;
}

/// Trigger source persistence
#[async_trait]
pub trait TriggerSourceRepository: Send + Sync {
    /// Insert or replace a trigger source
    async fn save_trigger_source(&self, source: &TriggerSource) -> Result<()>;

    async fn find_active_by_flow_version(
        &self,
        flow_version_id: Uuid,
        simulate: bool,
    ) -> Result<Option<TriggerSource>>;

    async fn find_active_by_flow(&self, flow_id: Uuid) -> Result<Vec<TriggerSource>>;

    /// Live sources ordered by creation, for recovery scans
    async fn list_active(&self, offset: usize, limit: usize) -> Result<Vec<TriggerSource>>;

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Named markers recording one-off system work
#[async_trait]
pub trait SystemMarkerRepository: Send + Sync {
    async fn get_marker(&self, name: &str) -> Result<Option<String>>;

    async fn set_marker(&self, name: &str, value: &str) -> Result<()>;
}

/// Everything the services persist
pub trait Storage: FlowVersionRepository + TriggerSourceRepository + SystemMarkerRepository {}

impl<T> Storage for T where T: FlowVersionRepository + TriggerSourceRepository + SystemMarkerRepository {}

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "sqlite" => Ok(Arc::new(SqliteStorage::new(&config.dsn).await?)),
        _ => Err(PieceFlowError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}

/// Clamp a requested page size to `1..=MAX_LIST_LIMIT`
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(crate::constants::DEFAULT_LIST_LIMIT)
        .clamp(1, crate::constants::MAX_LIST_LIMIT)
}

#[cfg(test)]
mod memory_test;
