//! Shared application state.

use std::sync::Arc;

use kgraph_core::KGraphConfig;
use kgraph_gateway::Gateways;
use kgraph_runtime::{CoordinatorSettings, GraphMutationCoordinator};
use kgraph_store::SqliteGraphStore;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: KGraphConfig,
    pub coordinator: GraphMutationCoordinator,
}

impl AppState {
    pub fn new(config: KGraphConfig, store: SqliteGraphStore, gateways: Gateways) -> Self {
        let settings = CoordinatorSettings::from_config(&config);
        let coordinator = GraphMutationCoordinator::new(Arc::new(store), gateways, settings);
        Self {
            config,
            coordinator,
        }
    }
}
