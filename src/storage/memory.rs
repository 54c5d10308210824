//! In-memory storage implementation
//!
//! Non-persistent storage for development and testing, backed by DashMap.
//! Data is lost on process restart and is not shared across processes.

use super::*;
use dashmap::DashMap;
use std::cmp::Reverse;

/// In-memory storage implementation
#[derive(Clone)]
pub struct MemoryStorage {
    flow_versions: Arc<DashMap<Uuid, FlowVersion>>,
    trigger_sources: Arc<DashMap<Uuid, TriggerSource>>,
    markers: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            flow_versions: Arc::new(DashMap::new()),
            trigger_sources: Arc::new(DashMap::new()),
            markers: Arc::new(DashMap::new()),
        }
    }

    fn versions_of(&self, flow_id: Uuid) -> Vec<FlowVersion> {
        self.flow_versions
            .iter()
            .filter(|entry| entry.flow_id == flow_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_key(version: &FlowVersion) -> (i64, Uuid) {
    (version.created.timestamp_millis(), version.id)
}

#[async_trait]
impl FlowVersionRepository for MemoryStorage {
    async fn find_one(&self, id: Uuid) -> Result<Option<FlowVersion>> {
        Ok(self.flow_versions.get(&id).map(|v| v.clone()))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FlowVersion>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.flow_versions.get(id).map(|v| v.clone()))
            .collect())
    }

    async fn save(&self, version: &FlowVersion) -> Result<()> {
        self.flow_versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn update_migrated_fields(&self, version: &FlowVersion) -> Result<()> {
        let Some(mut stored) = self.flow_versions.get_mut(&version.id) else {
            return Err(PieceFlowError::not_found(
                "FlowVersion",
                version.id.to_string(),
            ));
        };
        stored.schema_version = version.schema_version;
        stored.trigger = version.trigger.clone();
        stored.connection_ids = version.connection_ids.clone();
        stored.agent_ids = version.agent_ids.clone();
        Ok(())
    }

    async fn list(
        &self,
        flow_id: Uuid,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SeekPage<FlowVersion>> {
        let cursor = cursor.map(Cursor::decode).transpose()?;
        let mut rows = self.versions_of(flow_id);

        match cursor {
            None => rows.sort_unstable_by_key(|v| Reverse(sort_key(v))),
            Some(Cursor::Next { created_millis, id }) => {
                rows.retain(|v| sort_key(v) < (created_millis, id));
                rows.sort_unstable_by_key(|v| Reverse(sort_key(v)));
            }
            Some(Cursor::Previous { created_millis, id }) => {
                rows.retain(|v| sort_key(v) > (created_millis, id));
                rows.sort_unstable_by_key(sort_key);
            }
        }
        rows.truncate(limit + 1);

        Ok(build_page(rows, cursor, limit))
    }

    async fn latest_for_flow(&self, flow_id: Uuid) -> Result<Option<FlowVersion>> {
        Ok(self.versions_of(flow_id).into_iter().max_by_key(sort_key))
    }
}

#[async_trait]
impl TriggerSourceRepository for MemoryStorage {
    async fn save_trigger_source(&self, source: &TriggerSource) -> Result<()> {
        self.trigger_sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn find_active_by_flow_version(
        &self,
        flow_version_id: Uuid,
        simulate: bool,
    ) -> Result<Option<TriggerSource>> {
        Ok(self
            .trigger_sources
            .iter()
            .filter(|s| s.is_live() && s.flow_version_id == flow_version_id && s.simulate == simulate)
            .map(|s| s.value().clone())
            .max_by_key(|s| s.created))
    }

    async fn find_active_by_flow(&self, flow_id: Uuid) -> Result<Vec<TriggerSource>> {
        let mut sources: Vec<TriggerSource> = self
            .trigger_sources
            .iter()
            .filter(|s| s.is_live() && s.flow_id == flow_id)
            .map(|s| s.value().clone())
            .collect();
        sources.sort_unstable_by_key(|s| (s.created, s.id));
        Ok(sources)
    }

    async fn list_active(&self, offset: usize, limit: usize) -> Result<Vec<TriggerSource>> {
        let mut sources: Vec<TriggerSource> = self
            .trigger_sources
            .iter()
            .filter(|s| s.is_live())
            .map(|s| s.value().clone())
            .collect();
        sources.sort_unstable_by_key(|s| (s.created, s.id));
        Ok(sources.into_iter().skip(offset).take(limit).collect())
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut source) = self.trigger_sources.get_mut(&id) {
            source.deleted = Some(at);
            source.updated = at;
        }
        Ok(())
    }
}

#[async_trait]
impl SystemMarkerRepository for MemoryStorage {
    async fn get_marker(&self, name: &str) -> Result<Option<String>> {
        Ok(self.markers.get(name).map(|v| v.clone()))
    }

    async fn set_marker(&self, name: &str, value: &str) -> Result<()> {
        self.markers.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
