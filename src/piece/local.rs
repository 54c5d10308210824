//! Piece metadata loaded from a local JSON or YAML file
//!
//! The file holds a list of piece releases in registry format.

use super::InMemoryPieceRegistry;
use crate::Result;
use crate::model::PieceMetadata;
use std::path::Path;

/// Load every release in `path` into a new registry
pub async fn load_pieces_file(path: impl AsRef<Path>) -> Result<InMemoryPieceRegistry> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;

    let pieces: Vec<PieceMetadata> = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };

    let registry = InMemoryPieceRegistry::new();
    registry.extend(pieces);
    tracing::info!(path = %path.display(), releases = registry.len(), "Loaded piece metadata");
    Ok(registry)
}
