//! Clients for the external vector services.
//!
//! Embedding upsert/delete, whole-graph projection and similarity queries
//! are all delegated over HTTP. Each concern is a trait so the coordinator
//! can be driven by scripted fakes in tests.

pub mod client;
pub mod embedding;
pub mod layout;
pub mod recommend;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use kgraph_core::{GatewayConfig, Result};

pub use client::{CallFailure, ServiceClient};
pub use embedding::{EmbeddingDocument, EmbeddingGateway, HttpEmbeddingGateway};
pub use layout::{HttpLayoutGateway, LayoutGateway};
pub use recommend::{
    HttpRecommendationGateway, RecommendationGateway, RemoteMethod, RemoteQuery, ScoredId,
};

/// The three gateways the coordinator talks to.
#[derive(Clone)]
pub struct Gateways {
    pub embedding: Arc<dyn EmbeddingGateway>,
    pub layout: Arc<dyn LayoutGateway>,
    pub recommend: Arc<dyn RecommendationGateway>,
}

impl Gateways {
    /// HTTP gateways for the configured service URLs.
    pub fn http(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            embedding: Arc::new(HttpEmbeddingGateway::new(config)?),
            layout: Arc::new(HttpLayoutGateway::new(config)?),
            recommend: Arc::new(HttpRecommendationGateway::new(config)?),
        })
    }
}
