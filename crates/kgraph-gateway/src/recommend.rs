//! Vector-backed recommendations from the external similarity service.

use async_trait::async_trait;
use kgraph_core::{Error, GatewayConfig, OwnerKey, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::ServiceClient;

/// Strategies the similarity service computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteMethod {
    /// Nearest neighbours of the focal node.
    Similarity,
    /// Farthest nodes from the focal node.
    LeastSimilar,
    /// Nodes completing the analogy of an edge relation.
    Analogy,
}

impl RemoteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::LeastSimilar => "least-similar",
            Self::Analogy => "analogy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteQuery {
    pub method: RemoteMethod,
    pub node_id: String,
    /// Edge label, required by [`RemoteMethod::Analogy`].
    pub relation: Option<String>,
    pub top_k: usize,
}

/// A recommended node id with the service's relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    #[serde(default)]
    pub score: f64,
}

#[async_trait]
pub trait RecommendationGateway: Send + Sync {
    /// Ranked ids, most relevant first. May include ids no longer in the graph.
    async fn recommend(&self, owner: &OwnerKey, query: &RemoteQuery) -> Result<Vec<ScoredId>>;
}

/// `POST /recommend?method=&top_k=` on the similarity service.
pub struct HttpRecommendationGateway {
    client: ServiceClient,
}

#[derive(Deserialize)]
struct RecommendResponse {
    #[serde(default)]
    recommendations: Vec<ScoredId>,
}

impl HttpRecommendationGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(
                &config.recommend_url,
                config.timeout,
                config.max_attempts,
                config.backoff,
            )?,
        })
    }
}

#[async_trait]
impl RecommendationGateway for HttpRecommendationGateway {
    async fn recommend(&self, owner: &OwnerKey, query: &RemoteQuery) -> Result<Vec<ScoredId>> {
        let params = [
            ("method", query.method.as_str().to_string()),
            ("top_k", query.top_k.to_string()),
        ];
        let mut body = json!({ "owner": owner.tenant(), "nodeId": query.node_id });
        if let Some(relation) = &query.relation {
            body["relation"] = json!(relation);
        }

        let response: RecommendResponse = self
            .client
            .post_json("/recommend", &params, &body)
            .await
            .map_err(|f| {
                Error::RecommendationUnavailable(format!(
                    "{} recommendations for node {} of {}: {}",
                    query.method.as_str(),
                    query.node_id,
                    owner,
                    f
                ))
            })?;
        debug!(
            "{} recommendations for node {}: {} result(s)",
            query.method.as_str(),
            query.node_id,
            response.recommendations.len()
        );
        Ok(response.recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::{extract::Query, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(url: &str) -> GatewayConfig {
        GatewayConfig {
            recommend_url: url.into(),
            timeout: Duration::from_secs(2),
            max_attempts: 1,
            backoff: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_analogy_sends_relation_and_query() {
        let router = Router::new().route(
            "/recommend",
            post(
                |Query(params): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    if params.get("method").map(String::as_str) != Some("analogy")
                        || params.get("top_k").map(String::as_str) != Some("5")
                        || body["relation"] != "causes"
                        || body["nodeId"] != "n1"
                    {
                        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "method": "analogy",
                            "recommendations": [{"id": "n7", "score": 0.9}, {"id": "n3"}]
                        })),
                    )
                },
            ),
        );
        let gateway = HttpRecommendationGateway::new(&config(&spawn_stub(router).await)).unwrap();

        let query = RemoteQuery {
            method: RemoteMethod::Analogy,
            node_id: "n1".into(),
            relation: Some("causes".into()),
            top_k: 5,
        };
        let ids = gateway.recommend(&OwnerKey::user("u1"), &query).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].id, "n7");
        assert_eq!(ids[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_failure_is_recommendation_unavailable() {
        let router = Router::new().route(
            "/recommend",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let gateway = HttpRecommendationGateway::new(&config(&spawn_stub(router).await)).unwrap();
        let query = RemoteQuery {
            method: RemoteMethod::Similarity,
            node_id: "n1".into(),
            relation: None,
            top_k: 10,
        };

        let err = gateway.recommend(&OwnerKey::user("u1"), &query).await.unwrap_err();
        assert!(matches!(err, Error::RecommendationUnavailable(_)));
    }
}
