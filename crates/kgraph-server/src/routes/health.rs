//! Health and store statistics.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state.coordinator.stats()?;
    Ok(Json(json!({
        "status": "ok",
        "graphs": stats.graphs,
        "nodes": stats.nodes,
        "edges": stats.edges,
        "staleNodes": stats.stale_nodes,
        "pendingNodes": stats.pending_nodes,
        "dbSizeMb": stats.db_size_mb,
        "scopeMode": state.config.scope_mode,
    })))
}
