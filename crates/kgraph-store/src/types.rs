//! Data types for graphs, nodes, edges and store results.

use chrono::{DateTime, Utc};
use kgraph_core::OwnerKey;
use serde::{Deserialize, Serialize};

/// Canvas coordinates of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Build a position from optional coordinates.
    ///
    /// A missing coordinate, a non-finite value and the `(0, 0)` sentinel all
    /// mean "unpositioned".
    pub fn from_parts(x: Option<f64>, y: Option<f64>) -> Option<Self> {
        match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() && !(x == 0.0 && y == 0.0) => {
                Some(Self { x, y })
            }
            _ => None,
        }
    }
}

/// Where a node stands with respect to the external vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingState {
    /// Content committed, embedding not confirmed yet.
    Pending,
    /// Vector index holds the current content.
    Embedded,
    /// Embedding failed or was superseded; waiting for reconciliation.
    Stale,
}

impl EmbeddingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "embedded" => Self::Embedded,
            "stale" => Self::Stale,
            _ => Self::Pending,
        }
    }
}

/// A knowledge fragment in a user's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub content: String,
    pub labels: Vec<String>,
    #[serde(flatten)]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    pub embedding_state: EmbeddingState,
    pub embedding_stale: bool,
    pub content_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn ticket(&self) -> EmbeddingTicket {
        EmbeddingTicket {
            node_id: self.id.clone(),
            content_version: self.content_version,
        }
    }
}

/// A labelled relation between two nodes of the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One graph document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub owner: OwnerKey,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }
}

/// Fields of a node about to be inserted. Already validated and normalized.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub content: String,
    pub labels: Vec<String>,
    pub position: Option<Position>,
    pub source_message_id: Option<String>,
    pub source_conversation_id: Option<String>,
}

/// Partial node update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub content: Option<String>,
    pub labels: Option<Vec<String>>,
    /// `Some(None)` clears the position.
    pub position: Option<Option<Position>>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.labels.is_none() && self.position.is_none()
    }
}

/// Result of [`crate::SqliteGraphStore::update_node`].
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub node: Node,
    /// Node as it was before the update, for compensation.
    pub previous: Node,
    pub content_changed: bool,
}

/// Result of [`crate::SqliteGraphStore::delete_nodes`].
#[derive(Debug, Clone, Default)]
pub struct NodeDeletion {
    /// Ids that existed and were removed.
    pub removed: Vec<String>,
    /// Edges removed along with them.
    pub dropped_edges: usize,
}

impl NodeDeletion {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

/// Result of [`crate::SqliteGraphStore::add_or_append_edge`].
#[derive(Debug, Clone)]
pub struct EdgeWrite {
    pub edge: Edge,
    /// `true` when a new edge was created, `false` when labels were appended.
    pub created: bool,
}

/// A projected coordinate for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Identifies which content of a node an embed call carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingTicket {
    pub node_id: String,
    pub content_version: i64,
}

/// Counts of nodes settled after an embed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SettleReport {
    pub embedded: usize,
    pub stale: usize,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub graphs: i64,
    pub nodes: i64,
    pub edges: i64,
    pub stale_nodes: i64,
    pub pending_nodes: i64,
    pub db_path: String,
    pub db_size_mb: f64,
}

/// Trim labels, drop empty ones and keep the first occurrence of each.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        let label = label.as_ref().trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}

/// Set union preserving first-appearance order.
pub fn union_labels(existing: &[String], added: &[String]) -> Vec<String> {
    normalize_labels(existing.iter().chain(added.iter()))
}
