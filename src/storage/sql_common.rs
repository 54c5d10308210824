//! SQL helpers shared by the SQLite pool and transaction handles
//!
//! Flow version queries are generic over the executor so the same SQL runs
//! against a pool or an open transaction.

use crate::error::StorageError;
use crate::model::*;
use crate::storage::{Cursor, SeekPage, build_page};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Row, Sqlite, sqlite::SqliteRow};
use uuid::Uuid;

const SELECT_FLOW_VERSION: &str = "SELECT id, flow_id, display_name, schema_version, trigger, \
     valid, state, connection_ids, agent_ids, created, updated, updated_by FROM flow_versions";

/// Convert DateTime to SQLite INTEGER (unix millis)
#[inline]
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert SQLite INTEGER (unix millis) to DateTime
#[inline]
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

pub fn parse_flow_version(row: &SqliteRow) -> Result<FlowVersion> {
    let state: String = row.try_get("state")?;
    let state = FlowVersionState::parse(&state).ok_or_else(|| {
        StorageError::Database(format!("Unknown flow version state: {}", state))
    })?;

    Ok(FlowVersion {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        flow_id: Uuid::parse_str(&row.try_get::<String, _>("flow_id")?)?,
        display_name: row.try_get("display_name")?,
        schema_version: row
            .try_get::<Option<i64>, _>("schema_version")?
            .and_then(|v| u32::try_from(v).ok()),
        trigger: serde_json::from_str(&row.try_get::<String, _>("trigger")?)?,
        valid: row.try_get("valid")?,
        state,
        connection_ids: serde_json::from_str(&row.try_get::<String, _>("connection_ids")?)?,
        agent_ids: serde_json::from_str(&row.try_get::<String, _>("agent_ids")?)?,
        created: from_millis(row.try_get("created")?),
        updated: from_millis(row.try_get("updated")?),
        updated_by: row.try_get("updated_by")?,
    })
}

pub fn parse_trigger_source(row: &SqliteRow) -> Result<TriggerSource> {
    let strategy: String = row.try_get("type")?;
    let strategy = TriggerStrategy::parse(&strategy)
        .ok_or_else(|| StorageError::Database(format!("Unknown trigger type: {}", strategy)))?;

    Ok(TriggerSource {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        flow_id: Uuid::parse_str(&row.try_get::<String, _>("flow_id")?)?,
        flow_version_id: Uuid::parse_str(&row.try_get::<String, _>("flow_version_id")?)?,
        project_id: row.try_get("project_id")?,
        piece_name: row.try_get("piece_name")?,
        piece_version: row.try_get("piece_version")?,
        trigger_name: row.try_get("trigger_name")?,
        strategy,
        schedule: row
            .try_get::<Option<String>, _>("schedule")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        simulate: row.try_get("simulate")?,
        created: from_millis(row.try_get("created")?),
        updated: from_millis(row.try_get("updated")?),
        deleted: row.try_get::<Option<i64>, _>("deleted")?.map(from_millis),
    })
}

pub async fn fv_find_one<'e, E>(executor: E, id: Uuid) -> Result<Option<FlowVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_FLOW_VERSION))
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(parse_flow_version).transpose()
}

pub async fn fv_find_by_ids<'e, E>(executor: E, ids: &[Uuid]) -> Result<Vec<FlowVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let rows = sqlx::query(&format!(
        "{} WHERE id IN (SELECT value FROM json_each(?))",
        SELECT_FLOW_VERSION
    ))
    .bind(serde_json::to_string(&ids)?)
    .fetch_all(executor)
    .await?;
    rows.iter().map(parse_flow_version).collect()
}

pub async fn fv_save<'e, E>(executor: E, version: &FlowVersion) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO flow_versions (id, flow_id, display_name, schema_version, trigger, valid,
                                    state, connection_ids, agent_ids, created, updated, updated_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            flow_id = excluded.flow_id,
            display_name = excluded.display_name,
            schema_version = excluded.schema_version,
            trigger = excluded.trigger,
            valid = excluded.valid,
            state = excluded.state,
            connection_ids = excluded.connection_ids,
            agent_ids = excluded.agent_ids,
            updated = excluded.updated,
            updated_by = excluded.updated_by",
    )
    .bind(version.id.to_string())
    .bind(version.flow_id.to_string())
    .bind(&version.display_name)
    .bind(version.schema_version.map(i64::from))
    .bind(serde_json::to_string(&version.trigger)?)
    .bind(version.valid)
    .bind(version.state.as_str())
    .bind(serde_json::to_string(&version.connection_ids)?)
    .bind(serde_json::to_string(&version.agent_ids)?)
    .bind(to_millis(version.created))
    .bind(to_millis(version.updated))
    .bind(version.updated_by.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}

/// Returns the number of rows touched
pub async fn fv_update_migrated_fields<'e, E>(executor: E, version: &FlowVersion) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE flow_versions
         SET schema_version = ?, trigger = ?, connection_ids = ?, agent_ids = ?
         WHERE id = ?",
    )
    .bind(version.schema_version.map(i64::from))
    .bind(serde_json::to_string(&version.trigger)?)
    .bind(serde_json::to_string(&version.connection_ids)?)
    .bind(serde_json::to_string(&version.agent_ids)?)
    .bind(version.id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fv_list<'e, E>(
    executor: E,
    flow_id: Uuid,
    cursor: Option<Cursor>,
    limit: usize,
) -> Result<SeekPage<FlowVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let fetch = i64::try_from(limit + 1).unwrap_or(i64::MAX);
    let flow_id = flow_id.to_string();

    let rows = match cursor {
        None => {
            sqlx::query(&format!(
                "{} WHERE flow_id = ? ORDER BY created DESC, id DESC LIMIT ?",
                SELECT_FLOW_VERSION
            ))
            .bind(flow_id)
            .bind(fetch)
            .fetch_all(executor)
            .await?
        }
        Some(Cursor::Next { created_millis, id }) => {
            sqlx::query(&format!(
                "{} WHERE flow_id = ? AND (created, id) < (?, ?)
                 ORDER BY created DESC, id DESC LIMIT ?",
                SELECT_FLOW_VERSION
            ))
            .bind(flow_id)
            .bind(created_millis)
            .bind(id.to_string())
            .bind(fetch)
            .fetch_all(executor)
            .await?
        }
        Some(Cursor::Previous { created_millis, id }) => {
            sqlx::query(&format!(
                "{} WHERE flow_id = ? AND (created, id) > (?, ?)
                 ORDER BY created ASC, id ASC LIMIT ?",
                SELECT_FLOW_VERSION
            ))
            .bind(flow_id)
            .bind(created_millis)
            .bind(id.to_string())
            .bind(fetch)
            .fetch_all(executor)
            .await?
        }
    };

    let versions = rows
        .iter()
        .map(parse_flow_version)
        .collect::<Result<Vec<_>>>()?;
    Ok(build_page(versions, cursor, limit))
}

pub async fn fv_latest_for_flow<'e, E>(executor: E, flow_id: Uuid) -> Result<Option<FlowVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "{} WHERE flow_id = ? ORDER BY created DESC, id DESC LIMIT 1",
        SELECT_FLOW_VERSION
    ))
    .bind(flow_id.to_string())
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(parse_flow_version).transpose()
}
