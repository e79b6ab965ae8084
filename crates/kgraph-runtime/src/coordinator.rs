//! GraphMutationCoordinator — sequences graph writes with embedding calls.
//!
//! The graph store commits first; the embedding service is called after the
//! store lock is released. Whether a failed embed undoes the graph write is
//! decided by the [`EmbeddingPolicy`] of the mutation kind.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use kgraph_core::{EmbeddingPolicy, Error, OwnerKey, Result};
use kgraph_gateway::{EmbeddingDocument, Gateways, RemoteQuery};
use kgraph_store::{
    union_labels, Coordinate, Edge, EdgeWrite, EmbeddingTicket, Graph, NewNode, Node,
    NodeDeletion, SettleReport, SqliteGraphStore, StoreStats,
};
use tracing::{debug, info, warn};

use crate::inflight::InFlight;
use crate::input::{CreateNodeInput, EdgeInput, ImportInput, UpdateNodeInput};
use crate::recommend::{self, RecommendRequest, Recommendations};
use crate::types::*;

const RECONCILE_CONCURRENCY: usize = 4;

/// Owns every mutation of the owners' graphs and keeps the vector index in step.
pub struct GraphMutationCoordinator {
    store: Arc<SqliteGraphStore>,
    gateways: Gateways,
    settings: CoordinatorSettings,
    inflight: InFlight,
    layout_locks: DashMap<OwnerKey, Arc<tokio::sync::Mutex<()>>>,
}

impl GraphMutationCoordinator {
    pub fn new(store: Arc<SqliteGraphStore>, gateways: Gateways, settings: CoordinatorSettings) -> Self {
        info!(
            "Coordinator initialized: create={}, update={}, import={}, merge={}, self_loops={}",
            settings.policies.create,
            settings.policies.update,
            settings.policies.import,
            settings.policies.merge,
            settings.allow_self_loops
        );
        Self {
            store,
            gateways,
            settings,
            inflight: InFlight::new(),
            layout_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SqliteGraphStore {
        &self.store
    }

    fn policy(&self, kind: MutationKind) -> EmbeddingPolicy {
        let policies = &self.settings.policies;
        match kind {
            MutationKind::Create => policies.create,
            MutationKind::Update => policies.update,
            MutationKind::Import => policies.import,
            MutationKind::Merge => policies.merge,
        }
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn get_graph(&self, owner: &OwnerKey) -> Result<Graph> {
        self.store.get_or_create(owner)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    fn reload(&self, owner: &OwnerKey, node_id: &str) -> Result<Node> {
        self.store
            .get_node(owner, node_id)?
            .ok_or_else(|| Error::NotFound(format!("node {} (removed concurrently)", node_id)))
    }

    // ---------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------

    /// Create a node and embed it under the create policy.
    pub async fn create_node(&self, owner: &OwnerKey, input: CreateNodeInput) -> Result<Node> {
        let node = self.store.add_node(owner, input.into_new_node()?)?;
        debug!("Created node {} for {}", node.id, owner);

        if let Err(e) = self.embed(owner, std::slice::from_ref(&node)).await? {
            match self.policy(MutationKind::Create) {
                EmbeddingPolicy::Strict => {
                    warn!("Rolling back node {} of {}: {}", node.id, owner, e);
                    self.discard_nodes(owner, &[node.id.clone()]).await?;
                    return Err(e);
                }
                EmbeddingPolicy::BestEffort => {
                    warn!("Node {} of {} kept without embedding: {}", node.id, owner, e);
                }
            }
        }
        self.reload(owner, &node.id)
    }

    /// Apply a partial update; re-embed only when the content changed.
    pub async fn update_node(&self, owner: &OwnerKey, node_id: &str, input: UpdateNodeInput) -> Result<Node> {
        let patch = input.into_patch()?;
        if patch.is_empty() {
            return Err(Error::BadRequest(format!(
                "update node {}: no fields to update",
                node_id
            )));
        }
        let update = self.store.update_node(owner, node_id, patch)?;
        if !update.content_changed {
            return Ok(update.node);
        }

        if let Err(e) = self.embed(owner, std::slice::from_ref(&update.node)).await? {
            match self.policy(MutationKind::Update) {
                EmbeddingPolicy::Strict => {
                    let restored = self.store.restore_content(
                        owner,
                        node_id,
                        &update.previous.content,
                        update.node.content_version,
                    )?;
                    if restored {
                        warn!("Reverted update of node {} of {}: {}", node_id, owner, e);
                    } else {
                        warn!(
                            "Node {} of {} changed again before its update could be reverted",
                            node_id, owner
                        );
                    }
                    return Err(e);
                }
                EmbeddingPolicy::BestEffort => {
                    warn!("Node {} of {} updated without re-embedding: {}", node_id, owner, e);
                }
            }
        }
        self.reload(owner, node_id)
    }

    /// Promote every candidate of one source in a single import.
    pub async fn import_nodes(&self, owner: &OwnerKey, input: ImportInput) -> Result<Vec<Node>> {
        let (source_id, new_nodes) = input.into_new_nodes()?;
        let nodes = self.store.import_nodes(owner, &source_id, new_nodes)?;
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

        if let Err(e) = self.embed(owner, &nodes).await? {
            match self.policy(MutationKind::Import) {
                EmbeddingPolicy::Strict => {
                    warn!("Rolling back import of {} into {}: {}", source_id, owner, e);
                    self.discard_nodes(owner, &ids).await?;
                    self.store.forget_import(owner, &source_id)?;
                    return Err(e);
                }
                EmbeddingPolicy::BestEffort => {
                    warn!(
                        "Imported {} node(s) from {} without embedding: {}",
                        ids.len(),
                        source_id,
                        e
                    );
                }
            }
        }
        self.store.get_nodes(owner, &ids)
    }

    /// Delete nodes with their edges. Vector cleanup never fails the call.
    pub async fn delete_nodes(&self, owner: &OwnerKey, node_ids: &[String]) -> Result<NodeDeletion> {
        let ids = clean_ids(node_ids);
        if ids.is_empty() {
            return Err(Error::BadRequest("delete nodes: nodeIds must not be empty".into()));
        }
        let deletion = self.store.delete_nodes(owner, &ids)?;
        self.forget_vectors(owner, &deletion.removed).await;
        info!(
            "Deleted {} node(s) and {} edge(s) from {}",
            deletion.count(),
            deletion.dropped_edges,
            owner
        );
        Ok(deletion)
    }

    /// Fold several nodes into a new one.
    ///
    /// Contents are joined in the given order, labels unioned. Edges of the
    /// merged nodes are not carried over; the outcome reports how many went.
    pub async fn merge_nodes(&self, owner: &OwnerKey, node_ids: &[String]) -> Result<MergeOutcome> {
        let ids = clean_ids(node_ids);
        if ids.len() < 2 {
            return Err(Error::BadRequest(
                "merge nodes: at least two distinct node ids are required".into(),
            ));
        }
        let nodes = self.store.get_nodes(owner, &ids)?;
        if let Some(missing) = ids.iter().find(|id| !nodes.iter().any(|n| &n.id == *id)) {
            return Err(Error::NotFound(format!("node {} (merge nodes)", missing)));
        }

        let merged = NewNode {
            content: nodes
                .iter()
                .map(|n| n.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            labels: nodes
                .iter()
                .fold(Vec::new(), |acc, n| union_labels(&acc, &n.labels)),
            position: nodes.iter().find_map(|n| n.position),
            source_message_id: None,
            source_conversation_id: None,
        };
        let node = self.store.add_node(owner, merged)?;

        if let Err(e) = self.embed(owner, std::slice::from_ref(&node)).await? {
            match self.policy(MutationKind::Merge) {
                EmbeddingPolicy::Strict => {
                    warn!("Abandoning merge into {} for {}: {}", node.id, owner, e);
                    self.discard_nodes(owner, &[node.id.clone()]).await?;
                    return Err(e);
                }
                EmbeddingPolicy::BestEffort => {
                    warn!("Merged node {} of {} kept without embedding: {}", node.id, owner, e);
                }
            }
        }

        let deletion = self.store.delete_nodes(owner, &ids)?;
        self.forget_vectors(owner, &deletion.removed).await;
        info!(
            "Merged {} node(s) of {} into {}, dropping {} edge(s)",
            deletion.count(),
            owner,
            node.id,
            deletion.dropped_edges
        );

        Ok(MergeOutcome {
            node: self.reload(owner, &node.id)?,
            merged_ids: deletion.removed,
            dropped_edges: deletion.dropped_edges,
        })
    }

    async fn discard_nodes(&self, owner: &OwnerKey, ids: &[String]) -> Result<()> {
        let deletion = self.store.delete_nodes(owner, ids)?;
        self.forget_vectors(owner, &deletion.removed).await;
        Ok(())
    }

    async fn forget_vectors(&self, owner: &OwnerKey, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.gateways.embedding.delete(owner, ids).await {
            warn!("Vectors of {} node(s) of {} left behind: {}", ids.len(), owner, e);
        }
    }

    // ---------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------

    /// Create the edge or append labels to the existing one.
    pub fn add_edge(&self, owner: &OwnerKey, input: &EdgeInput) -> Result<EdgeWrite> {
        let (source, target) = input.endpoints()?;
        if source == target && !self.settings.allow_self_loops {
            return Err(Error::BadRequest(format!(
                "edge {} -> {}: self loops are not allowed",
                source, target
            )));
        }
        self.store
            .add_or_append_edge(owner, source, target, &input.labels())
    }

    pub fn replace_edge_labels(&self, owner: &OwnerKey, input: &EdgeInput) -> Result<Edge> {
        let (source, target) = input.endpoints()?;
        self.store
            .replace_edge_labels(owner, source, target, &input.labels())
    }

    pub fn delete_edge(&self, owner: &OwnerKey, input: &EdgeInput) -> Result<()> {
        let (source, target) = input.endpoints()?;
        self.store.delete_edge(owner, source, target)
    }

    // ---------------------------------------------------------------
    // Layout & recommendations
    // ---------------------------------------------------------------

    /// Project the owner's graph and store the coordinates.
    ///
    /// One recompute per owner at a time. On failure nothing is written.
    pub async fn recompute_layout(&self, owner: &OwnerKey) -> Result<Vec<Coordinate>> {
        let lock = self
            .layout_locks
            .entry(owner.clone())
            .or_default()
            .value()
            .clone();
        let result = {
            let _held = lock.lock().await;
            self.project_and_apply(owner).await
        };
        drop(lock);
        // the map only keeps locks someone is waiting on
        self.layout_locks
            .remove_if(owner, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn project_and_apply(&self, owner: &OwnerKey) -> Result<Vec<Coordinate>> {
        let coords = self.gateways.layout.project(owner).await?;
        if coords.is_empty() {
            debug!("Empty projection for {}", owner);
            return Ok(Vec::new());
        }
        let applied = self.store.apply_layout(owner, &coords)?;
        info!(
            "Applied {} of {} projected coordinate(s) for {}",
            applied.len(),
            coords.len(),
            owner
        );
        Ok(applied)
    }

    pub async fn recommend(&self, owner: &OwnerKey, request: RecommendRequest) -> Result<Recommendations> {
        let params = request.validate()?;
        let graph = self.store.find(owner)?;
        if let Some(focal) = params.node_id.as_deref() {
            if !graph.as_ref().is_some_and(|g| g.node(focal).is_some()) {
                return Err(Error::NotFound(format!(
                    "node {} ({} recommendations)",
                    focal,
                    params.method.as_str()
                )));
            }
        }
        let Some(graph) = graph else {
            return Ok(Recommendations {
                method: params.method,
                ids: Vec::new(),
            });
        };

        let ids = match params.method.remote() {
            Some(method) => {
                let query = RemoteQuery {
                    method,
                    node_id: params.node_id.clone().unwrap_or_default(),
                    relation: params.relation.clone(),
                    top_k: params.top_k,
                };
                let scored = self.gateways.recommend.recommend(owner, &query).await?;
                // the graph may have changed while the call was out
                let graph = self.store.find(owner)?.unwrap_or(graph);
                recommend::filter_existing(
                    &graph,
                    scored.into_iter().map(|s| s.id),
                    params.node_id.as_deref(),
                    params.top_k,
                )
            }
            None => recommend::local(&graph, &params),
        };

        Ok(Recommendations {
            method: params.method,
            ids,
        })
    }

    // ---------------------------------------------------------------
    // Embedding
    // ---------------------------------------------------------------

    /// Upsert `nodes` in one call and settle their state.
    ///
    /// The outer error is a store failure and propagates as is; the inner one
    /// is the gateway failure the embedding policy decides about.
    async fn embed(&self, owner: &OwnerKey, nodes: &[Node]) -> Result<Result<()>> {
        let tickets: Vec<EmbeddingTicket> = nodes.iter().map(Node::ticket).collect();
        let guard = self.inflight.acquire(owner, &tickets);
        if guard.is_empty() {
            return Ok(Ok(()));
        }
        let (report, outcome) = self.upsert_and_settle(owner, nodes, guard.tickets()).await?;
        debug!(
            "Embedding for {} settled: {} embedded, {} stale",
            owner, report.embedded, report.stale
        );
        Ok(outcome)
    }

    /// Returns the settle report and the gateway outcome; only store errors
    /// fail the outer result.
    async fn upsert_and_settle(
        &self,
        owner: &OwnerKey,
        nodes: &[Node],
        tickets: &[EmbeddingTicket],
    ) -> Result<(SettleReport, Result<()>)> {
        let docs: Vec<EmbeddingDocument> = nodes
            .iter()
            .filter(|n| tickets.contains(&n.ticket()))
            .map(|n| EmbeddingDocument {
                id: n.id.clone(),
                content: n.content.clone(),
            })
            .collect();
        let outcome = self.gateways.embedding.upsert(owner, &docs).await;
        let report = self.store.settle_embedding(owner, tickets, outcome.is_ok())?;
        Ok((report, outcome))
    }

    /// Re-embed the owner's stale nodes and abandoned pending ones.
    pub async fn reconcile(&self, owner: &OwnerKey) -> Result<ReconcileReport> {
        let nodes = self.store.nodes_needing_embedding(
            owner,
            self.pending_cutoff(),
            self.settings.reconcile_batch,
        )?;
        let mut report = ReconcileReport {
            candidates: nodes.len(),
            ..Default::default()
        };
        if nodes.is_empty() {
            return Ok(report);
        }
        report.owners = 1;

        let tickets: Vec<EmbeddingTicket> = nodes.iter().map(Node::ticket).collect();
        let guard = self.inflight.acquire(owner, &tickets);
        report.in_flight = tickets.len() - guard.tickets().len();

        let claimed = self.store.claim_for_embedding(owner, guard.tickets())?;
        if claimed.is_empty() {
            return Ok(report);
        }

        let (settled, outcome) = self.upsert_and_settle(owner, &nodes, &claimed).await?;
        report.settled(settled);
        if let Err(e) = outcome {
            report.failures += 1;
            warn!("Reconcile of {} node(s) of {} failed: {}", claimed.len(), owner, e);
        }
        Ok(report)
    }

    /// Reconcile every owner with nodes needing embedding, a few owners at a time.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let owners = self.store.owners_needing_embedding(self.pending_cutoff())?;
        let outcomes: Vec<(OwnerKey, Result<ReconcileReport>)> = stream::iter(owners)
            .map(|owner| async move {
                let outcome = self.reconcile(&owner).await;
                (owner, outcome)
            })
            .buffer_unordered(RECONCILE_CONCURRENCY)
            .collect()
            .await;

        let mut total = ReconcileReport::default();
        for (owner, outcome) in outcomes {
            match outcome {
                Ok(report) => total.absorb(report),
                Err(e) => {
                    total.failures += 1;
                    warn!("Reconcile of {} aborted: {}", owner, e);
                }
            }
        }
        if total.candidates > 0 {
            info!(
                "Reconcile pass: {} owner(s), {} embedded, {} still stale, {} in flight",
                total.owners, total.embedded, total.stale, total.in_flight
            );
        }
        Ok(total)
    }

    fn pending_cutoff(&self) -> chrono::DateTime<Utc> {
        let grace = chrono::Duration::from_std(self.settings.pending_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() - grace
    }
}

/// Trim, drop blanks and duplicates, keep order.
fn clean_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests;
