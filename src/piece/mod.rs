//! Piece metadata providers
//!
//! Resolves a piece name and version (exact or a semver range such as
//! `~0.3.1`) to the piece's declared actions, triggers and props.

pub mod local;
pub mod props;
pub mod remote;

use crate::config::PiecesConfig;
use crate::model::PieceMetadata;
use crate::{PieceFlowError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use semver::{Version, VersionReq};
use std::sync::Arc;
use std::time::Duration;

pub use local::load_pieces_file;
pub use remote::RemotePieceRegistry;

/// Lookup key of a piece
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceQuery {
    pub name: String,

    /// Exact version, semver range, or `None` for the latest release
    pub version: Option<String>,

    pub project_id: Option<String>,

    pub platform_id: Option<String>,
}

impl PieceQuery {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            version: if version.is_empty() { None } else { Some(version) },
            project_id: None,
            platform_id: None,
        }
    }

    pub fn with_project(mut self, project_id: Option<&str>, platform_id: Option<&str>) -> Self {
        self.project_id = project_id.map(str::to_string);
        self.platform_id = platform_id.map(str::to_string);
        self
    }
}

/// Resolves piece metadata from a registry
#[async_trait]
pub trait PieceMetadataProvider: Send + Sync {
    /// Metadata of the best matching version, `None` when nothing matches
    async fn get(&self, query: &PieceQuery) -> Result<Option<Arc<PieceMetadata>>>;

    async fn get_or_throw(&self, query: &PieceQuery) -> Result<Arc<PieceMetadata>> {
        self.get(query)
            .await?
            .ok_or_else(|| PieceFlowError::PieceNotFound {
                name: query.name.clone(),
                version: query.version.clone().unwrap_or_else(|| "latest".to_string()),
            })
    }
}

/// How a requested version string selects a release
#[derive(Debug, Clone, PartialEq)]
pub enum VersionSelector {
    Latest,
    Exact(Version),
    Range(VersionReq),
}

impl VersionSelector {
    pub fn parse(version: Option<&str>) -> Result<Self> {
        let raw = match version.map(str::trim) {
            None | Some("") | Some("latest") | Some("*") => return Ok(VersionSelector::Latest),
            Some(raw) => raw,
        };
        if let Ok(exact) = Version::parse(raw) {
            return Ok(VersionSelector::Exact(exact));
        }
        Ok(VersionSelector::Range(VersionReq::parse(raw)?))
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSelector::Latest => version.pre.is_empty(),
            VersionSelector::Exact(exact) => exact == version,
            VersionSelector::Range(req) => req.matches(version),
        }
    }
}

/// Picks the highest release of `candidates` matching `requested`
pub fn resolve_version<'a>(
    candidates: impl IntoIterator<Item = &'a Arc<PieceMetadata>>,
    requested: Option<&str>,
) -> Result<Option<Arc<PieceMetadata>>> {
    let selector = VersionSelector::parse(requested)?;
    let best = candidates
        .into_iter()
        .filter_map(|piece| Version::parse(&piece.version).ok().map(|v| (v, piece)))
        .filter(|(v, _)| selector.matches(v))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, piece)| Arc::clone(piece));
    Ok(best)
}

/// Piece registry held in memory
///
/// Backs tests and the `memory`/`file` piece sources.
#[derive(Default)]
pub struct InMemoryPieceRegistry {
    pieces: DashMap<String, Vec<Arc<PieceMetadata>>>,
}

impl InMemoryPieceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one release; replaces a release with the same version
    pub fn insert(&self, piece: PieceMetadata) {
        let mut releases = self.pieces.entry(piece.name.clone()).or_default();
        releases.retain(|existing| existing.version != piece.version);
        releases.push(Arc::new(piece));
    }

    pub fn extend(&self, pieces: impl IntoIterator<Item = PieceMetadata>) {
        for piece in pieces {
            self.insert(piece);
        }
    }

    pub fn len(&self) -> usize {
        self.pieces.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PieceMetadataProvider for InMemoryPieceRegistry {
    async fn get(&self, query: &PieceQuery) -> Result<Option<Arc<PieceMetadata>>> {
        let Some(releases) = self.pieces.get(&query.name) else {
            return Ok(None);
        };
        resolve_version(releases.value().iter(), query.version.as_deref())
    }
}

/// Build the piece provider selected by configuration
pub async fn create_piece_provider(config: &PiecesConfig) -> Result<Arc<dyn PieceMetadataProvider>> {
    match config.source.as_str() {
        "memory" => Ok(Arc::new(InMemoryPieceRegistry::new())),
        "file" => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| PieceFlowError::config("pieces.path is required for the file source"))?;
            Ok(Arc::new(load_pieces_file(path).await?))
        }
        "remote" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| PieceFlowError::config("pieces.url is required for the remote source"))?;
            Ok(Arc::new(RemotePieceRegistry::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => Err(PieceFlowError::config(format!(
            "Unsupported pieces source: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod piece_test;
#[cfg(test)]
mod props_test;
