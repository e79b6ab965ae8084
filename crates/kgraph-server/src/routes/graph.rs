//! Whole-graph endpoints: read, layout, reconcile.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use kgraph_runtime::ReconcileReport;
use kgraph_store::Coordinate;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiResult;
use crate::extract::Json;
use crate::owner::Owner;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/graph", get(get_graph))
        .route("/layout", post(recompute_layout))
        .route("/reconcile", post(reconcile))
}

async fn get_graph(State(state): State<Arc<AppState>>, Owner(owner): Owner) -> ApiResult<Json<Value>> {
    let graph = state.coordinator.get_graph(&owner)?;
    Ok(Json(json!({
        "nodes": graph.nodes,
        "edges": graph.edges,
        "updatedAt": graph.updated_at,
    })))
}

async fn recompute_layout(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> ApiResult<Json<Vec<Coordinate>>> {
    let applied = state.coordinator.recompute_layout(&owner).await?;
    Ok(Json(applied))
}

async fn reconcile(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> ApiResult<Json<ReconcileReport>> {
    let report = state.coordinator.reconcile(&owner).await?;
    info!(
        "Manual reconcile of {}: {} embedded, {} still stale",
        owner, report.embedded, report.stale
    );
    Ok(Json(report))
}
