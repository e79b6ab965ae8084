//! Whole-graph 2D projection from the external layout service.

use async_trait::async_trait;
use kgraph_core::{Error, GatewayConfig, OwnerKey, Result};
use kgraph_store::Coordinate;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::ServiceClient;

#[async_trait]
pub trait LayoutGateway: Send + Sync {
    /// Coordinates for every embedded node of the owner. Empty when the owner
    /// has no embeddings yet.
    async fn project(&self, owner: &OwnerKey) -> Result<Vec<Coordinate>>;
}

/// `POST /layout` on the projection service.
pub struct HttpLayoutGateway {
    client: ServiceClient,
}

#[derive(Deserialize)]
struct ProjectedPoint {
    id: String,
    x: Option<f64>,
    y: Option<f64>,
}

impl HttpLayoutGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(
                &config.layout_url,
                config.timeout,
                config.max_attempts,
                config.backoff,
            )?,
        })
    }
}

#[async_trait]
impl LayoutGateway for HttpLayoutGateway {
    async fn project(&self, owner: &OwnerKey) -> Result<Vec<Coordinate>> {
        let points: Vec<ProjectedPoint> = self
            .client
            .post_json("/layout", &[], &json!({ "owner": owner.tenant() }))
            .await
            .map_err(|f| Error::LayoutUnavailable(format!("projection for {}: {}", owner, f)))?;

        let coords: Vec<Coordinate> = points
            .into_iter()
            .filter_map(|p| match (p.x, p.y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                    Some(Coordinate { id: p.id, x, y })
                }
                _ => None,
            })
            .collect();
        debug!("Projection for {} returned {} point(s)", owner, coords.len());
        Ok(coords)
    }
}
