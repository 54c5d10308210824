//! SQLite storage implementation
//!
//! Persists flow versions, trigger sources and system markers using SQLite.

use crate::model::*;
use crate::storage::{
    Cursor, FlowVersionRepository, SeekPage, SystemMarkerRepository, TriggerSourceRepository,
    sql_common::*,
};
use crate::{PieceFlowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g., ".pieceflow/pieceflow.db" or ":memory:" for in-memory)
    pub async fn new(dsn: &str) -> Result<Self> {
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{}?mode=rwc", dsn)
            }
        } else {
            format!("sqlite:{}?mode=rwc", dsn)
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        if file_path.contains("..") {
            return Err(PieceFlowError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // every connection to :memory: opens its own database
        let max_connections = if file_path == ":memory:" { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&connection_string)
            .await
            .map_err(|e| PieceFlowError::storage(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        tracing::debug!(dsn = %file_path, "SQLite storage ready");
        Ok(Self { pool })
    }

    /// Open a transaction whose flow version writes commit together
    pub async fn begin(&self) -> Result<SqliteTransaction> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
        })
    }
}

#[async_trait]
impl FlowVersionRepository for SqliteStorage {
    async fn find_one(&self, id: Uuid) -> Result<Option<FlowVersion>> {
        fv_find_one(&self.pool, id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FlowVersion>> {
        fv_find_by_ids(&self.pool, ids).await
    }

    async fn save(&self, version: &FlowVersion) -> Result<()> {
        fv_save(&self.pool, version).await
    }

    async fn update_migrated_fields(&self, version: &FlowVersion) -> Result<()> {
        if fv_update_migrated_fields(&self.pool, version).await? == 0 {
            return Err(PieceFlowError::not_found(
                "FlowVersion",
                version.id.to_string(),
            ));
        }
        Ok(())
    }

    async fn list(
        &self,
        flow_id: Uuid,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SeekPage<FlowVersion>> {
        let cursor = cursor.map(Cursor::decode).transpose()?;
        fv_list(&self.pool, flow_id, cursor, limit).await
    }

    async fn latest_for_flow(&self, flow_id: Uuid) -> Result<Option<FlowVersion>> {
        fv_latest_for_flow(&self.pool, flow_id).await
    }
}

#[async_trait]
impl TriggerSourceRepository for SqliteStorage {
    async fn save_trigger_source(&self, source: &TriggerSource) -> Result<()> {
        let schedule = source
            .schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO trigger_sources (id, flow_id, flow_version_id, project_id, piece_name,
                                          piece_version, trigger_name, type, schedule, simulate,
                                          created, updated, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                flow_id = excluded.flow_id,
                flow_version_id = excluded.flow_version_id,
                project_id = excluded.project_id,
                piece_name = excluded.piece_name,
                piece_version = excluded.piece_version,
                trigger_name = excluded.trigger_name,
                type = excluded.type,
                schedule = excluded.schedule,
                simulate = excluded.simulate,
                updated = excluded.updated,
                deleted = excluded.deleted",
        )
        .bind(source.id.to_string())
        .bind(source.flow_id.to_string())
        .bind(source.flow_version_id.to_string())
        .bind(&source.project_id)
        .bind(&source.piece_name)
        .bind(&source.piece_version)
        .bind(&source.trigger_name)
        .bind(source.strategy.as_str())
        .bind(schedule)
        .bind(source.simulate)
        .bind(to_millis(source.created))
        .bind(to_millis(source.updated))
        .bind(source.deleted.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_by_flow_version(
        &self,
        flow_version_id: Uuid,
        simulate: bool,
    ) -> Result<Option<TriggerSource>> {
        let row = sqlx::query(
            "SELECT * FROM trigger_sources
             WHERE flow_version_id = ? AND simulate = ? AND deleted IS NULL
             ORDER BY created DESC LIMIT 1",
        )
        .bind(flow_version_id.to_string())
        .bind(simulate)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_trigger_source).transpose()
    }

    async fn find_active_by_flow(&self, flow_id: Uuid) -> Result<Vec<TriggerSource>> {
        let rows = sqlx::query(
            "SELECT * FROM trigger_sources
             WHERE flow_id = ? AND deleted IS NULL
             ORDER BY created ASC, id ASC",
        )
        .bind(flow_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_trigger_source).collect()
    }

    async fn list_active(&self, offset: usize, limit: usize) -> Result<Vec<TriggerSource>> {
        let rows = sqlx::query(
            "SELECT * FROM trigger_sources
             WHERE deleted IS NULL
             ORDER BY created ASC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_trigger_source).collect()
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE trigger_sources SET deleted = ?, updated = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(to_millis(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SystemMarkerRepository for SqliteStorage {
    async fn get_marker(&self, name: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM system_markers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_marker(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_markers (name, value, updated) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated = excluded.updated",
        )
        .bind(name)
        .bind(value)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Flow version repository scoped to an open SQLite transaction
///
/// Nothing is visible to other connections until [`SqliteTransaction::commit`].
/// Dropping the handle without committing rolls the work back.
pub struct SqliteTransaction {
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl SqliteTransaction {
    pub async fn commit(self) -> Result<()> {
        if let Some(tx) = self.tx.into_inner() {
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        if let Some(tx) = self.tx.into_inner() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn closed() -> PieceFlowError {
    PieceFlowError::storage("Transaction already finished")
}

#[async_trait]
impl FlowVersionRepository for SqliteTransaction {
    async fn find_one(&self, id: Uuid) -> Result<Option<FlowVersion>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        fv_find_one(&mut **tx, id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FlowVersion>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        fv_find_by_ids(&mut **tx, ids).await
    }

    async fn save(&self, version: &FlowVersion) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        fv_save(&mut **tx, version).await
    }

    async fn update_migrated_fields(&self, version: &FlowVersion) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        if fv_update_migrated_fields(&mut **tx, version).await? == 0 {
            return Err(PieceFlowError::not_found(
                "FlowVersion",
                version.id.to_string(),
            ));
        }
        Ok(())
    }

    async fn list(
        &self,
        flow_id: Uuid,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SeekPage<FlowVersion>> {
        let cursor = cursor.map(Cursor::decode).transpose()?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        fv_list(&mut **tx, flow_id, cursor, limit).await
    }

    async fn latest_for_flow(&self, flow_id: Uuid) -> Result<Option<FlowVersion>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed)?;
        fv_latest_for_flow(&mut **tx, flow_id).await
    }
}
