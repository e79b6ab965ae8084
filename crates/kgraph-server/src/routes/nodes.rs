//! Node endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Router;
use kgraph_runtime::{CreateNodeInput, ImportInput, MergeOutcome, NodeIdsInput, UpdateNodeInput};
use kgraph_store::Node;

use crate::error::ApiResult;
use crate::extract::Json;
use crate::owner::Owner;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/nodes", post(create_node))
        .route("/nodes/batch", post(import_nodes))
        .route("/nodes/delete", post(delete_nodes))
        .route("/nodes/merge", post(merge_nodes))
        .route("/nodes/{id}", patch(update_node))
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<CreateNodeInput>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = state.coordinator.create_node(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn update_node(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<UpdateNodeInput>,
) -> ApiResult<Json<Node>> {
    let node = state.coordinator.update_node(&owner, &id, body).await?;
    Ok(Json(node))
}

async fn import_nodes(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<ImportInput>,
) -> ApiResult<(StatusCode, Json<Vec<Node>>)> {
    let nodes = state.coordinator.import_nodes(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(nodes)))
}

async fn delete_nodes(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<NodeIdsInput>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete_nodes(&owner, &body.node_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn merge_nodes(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(body): Json<NodeIdsInput>,
) -> ApiResult<(StatusCode, Json<MergeOutcome>)> {
    let outcome = state.coordinator.merge_nodes(&owner, &body.node_ids).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
