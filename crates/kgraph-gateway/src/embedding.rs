//! Embedding upsert and delete against the external vector index.

use async_trait::async_trait;
use kgraph_core::{Error, GatewayConfig, OwnerKey, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::client::ServiceClient;

/// Text to embed under a node id. The vector id is always the node id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingDocument {
    pub id: String,
    pub content: String,
}

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Insert or replace the vectors of `docs`. Safe to retry.
    async fn upsert(&self, owner: &OwnerKey, docs: &[EmbeddingDocument]) -> Result<()>;

    /// Remove the vectors of `ids`. Ids the index does not know are not an error.
    async fn delete(&self, owner: &OwnerKey, ids: &[String]) -> Result<()>;
}

/// `POST /embed` and `POST /embed/delete` on the vector service.
pub struct HttpEmbeddingGateway {
    client: ServiceClient,
}

impl HttpEmbeddingGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(
                &config.embedding_url,
                config.timeout,
                config.max_attempts,
                config.backoff,
            )?,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for HttpEmbeddingGateway {
    async fn upsert(&self, owner: &OwnerKey, docs: &[EmbeddingDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let body = json!({ "owner": owner.tenant(), "nodes": docs });
        self.client
            .post("/embed", &[], &body)
            .await
            .map_err(|f| {
                Error::EmbeddingUnavailable(format!(
                    "upsert of {} node(s) for {}: {}",
                    docs.len(),
                    owner,
                    f
                ))
            })?;
        debug!("Embedded {} node(s) for {}", docs.len(), owner);
        Ok(())
    }

    async fn delete(&self, owner: &OwnerKey, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "owner": owner.tenant(), "ids": ids });
        self.client
            .post("/embed/delete", &[], &body)
            .await
            .map_err(|f| {
                Error::EmbeddingUnavailable(format!(
                    "delete of {} vector(s) for {}: {}",
                    ids.len(),
                    owner,
                    f
                ))
            })?;
        debug!("Deleted {} vector(s) for {}", ids.len(), owner);
        Ok(())
    }
}
