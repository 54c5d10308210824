//! Remote piece registry
//!
//! Fetches piece metadata over HTTP from `GET {base}/v1/pieces/{name}`,
//! passing the requested version as a query parameter. A 404 means the piece
//! (or a matching version) does not exist.

use super::{PieceMetadataProvider, PieceQuery};
use crate::error::NetworkError;
use crate::model::PieceMetadata;
use crate::{PieceFlowError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Piece registry reached over HTTP
pub struct RemotePieceRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl RemotePieceRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn piece_url(&self, name: &str) -> String {
        format!("{}/v1/pieces/{}", self.base_url, name)
    }
}

#[async_trait]
impl PieceMetadataProvider for RemotePieceRegistry {
    #[tracing::instrument(skip(self), fields(piece_name = %query.name))]
    async fn get(&self, query: &PieceQuery) -> Result<Option<Arc<PieceMetadata>>> {
        let mut request = self.client.get(self.piece_url(&query.name));
        if let Some(version) = &query.version {
            request = request.query(&[("version", version)]);
        }
        if let Some(project_id) = &query.project_id {
            request = request.query(&[("projectId", project_id)]);
        }
        if let Some(platform_id) = &query.platform_id {
            request = request.query(&[("platformId", platform_id)]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let piece: PieceMetadata = response.json().await.map_err(|e| {
                    PieceFlowError::Network(NetworkError::Http(format!(
                        "Failed to parse piece '{}' from {}: {}",
                        query.name, self.base_url, e
                    )))
                })?;
                Ok(Some(Arc::new(piece)))
            }
            status => Err(PieceFlowError::Network(NetworkError::Http(format!(
                "Piece registry {} returned {} for '{}'",
                self.base_url, status, query.name
            )))),
        }
    }
}
