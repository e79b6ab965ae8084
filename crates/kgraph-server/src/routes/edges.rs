//! Edge endpoints. Edges are addressed by their endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use kgraph_runtime::EdgeInput;
use kgraph_store::Edge;

use crate::error::ApiResult;
use crate::extract::Json;
use crate::owner::Owner;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/edges", post(add_edge).patch(replace_labels))
        .route("/edges/delete", post(delete_edge))
}

/// 201 when the edge is new, 200 when labels were appended to an existing one.
async fn add_edge(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<EdgeInput>,
) -> ApiResult<(StatusCode, Json<Edge>)> {
    let write = state.coordinator.add_edge(&owner, &body)?;
    let status = if write.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(write.edge)))
}

async fn replace_labels(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<EdgeInput>,
) -> ApiResult<Json<Edge>> {
    let edge = state.coordinator.replace_edge_labels(&owner, &body)?;
    Ok(Json(edge))
}

async fn delete_edge(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<EdgeInput>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete_edge(&owner, &body)?;
    Ok(StatusCode::NO_CONTENT)
}
