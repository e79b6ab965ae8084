//! Runtime types.

use std::time::Duration;

use kgraph_core::{EmbeddingPolicies, KGraphConfig};
use kgraph_store::{Node, SettleReport};
use serde::Serialize;

/// Mutation kinds that carry their own embedding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Import,
    Merge,
}

/// Knobs of the coordinator, taken from [`KGraphConfig`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub policies: EmbeddingPolicies,
    pub allow_self_loops: bool,
    /// A `pending` node younger than this is assumed to have an embed call in flight.
    pub pending_grace: Duration,
    /// Nodes re-embedded per owner in one reconcile pass.
    pub reconcile_batch: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            policies: EmbeddingPolicies::default(),
            allow_self_loops: false,
            pending_grace: Duration::from_secs(120),
            reconcile_batch: 256,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &KGraphConfig) -> Self {
        Self {
            policies: config.policies,
            allow_self_loops: config.allow_self_loops,
            pending_grace: config.pending_grace,
            ..Default::default()
        }
    }
}

/// Result of merging several nodes into one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub node: Node,
    pub merged_ids: Vec<String>,
    /// Edges that touched the merged nodes and were removed with them.
    pub dropped_edges: usize,
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub owners: usize,
    /// Nodes found stale or abandoned in `pending`.
    pub candidates: usize,
    /// Skipped because an embed call for them is already running.
    pub in_flight: usize,
    pub embedded: usize,
    pub stale: usize,
    /// Owners whose re-embed call failed.
    pub failures: usize,
}

impl ReconcileReport {
    pub(crate) fn absorb(&mut self, other: ReconcileReport) {
        self.owners += other.owners;
        self.candidates += other.candidates;
        self.in_flight += other.in_flight;
        self.embedded += other.embedded;
        self.stale += other.stale;
        self.failures += other.failures;
    }

    pub(crate) fn settled(&mut self, report: SettleReport) {
        self.embedded += report.embedded;
        self.stale += report.stale;
    }
}
