//! Recommendation endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use kgraph_runtime::{RecommendRequest, Recommendations};

use crate::error::ApiResult;
use crate::extract::{Json, Query};
use crate::owner::Owner;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/recommendations", get(recommend))
}

async fn recommend(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Query(request): Query<RecommendRequest>,
) -> ApiResult<Json<Recommendations>> {
    let recommendations = state.coordinator.recommend(&owner, request).await?;
    Ok(Json(recommendations))
}
