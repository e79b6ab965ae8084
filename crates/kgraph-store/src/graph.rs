//! Structural view of a graph document using petgraph.
//!
//! Edge direction is ignored; structural recommendation only cares about
//! who is connected to whom.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};

use crate::types::Graph;

/// Undirected adjacency index over one graph document.
pub struct GraphIndex {
    graph: UnGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
}

impl GraphIndex {
    /// Build the index. Parallel and self-loop edges collapse away.
    pub fn build(doc: &Graph) -> Self {
        let mut graph = UnGraph::with_capacity(doc.nodes.len(), doc.edges.len());
        let mut node_index = HashMap::with_capacity(doc.nodes.len());
        for node in &doc.nodes {
            let idx = graph.add_node(node.id.clone());
            node_index.insert(node.id.clone(), idx);
        }
        for edge in &doc.edges {
            if edge.source == edge.target {
                continue;
            }
            if let (Some(&a), Some(&b)) = (node_index.get(&edge.source), node_index.get(&edge.target)) {
                graph.update_edge(a, b, ());
            }
        }
        Self { graph, node_index }
    }

    /// Adamic–Adar score of every node sharing a neighbour with `focal`.
    ///
    /// Direct neighbours and the focal node itself are excluded. Each common
    /// neighbour `z` contributes `1 / ln(deg(z))`; a common neighbour always
    /// has degree of at least two, so the logarithm is positive. Results are
    /// sorted by descending score, then by id for determinism.
    pub fn adamic_adar(&self, focal: &str) -> Vec<(String, f64)> {
        let Some(&focal_idx) = self.node_index.get(focal) else {
            return Vec::new();
        };

        let direct: HashSet<NodeIndex> = self.graph.neighbors(focal_idx).collect();
        let mut scores: HashMap<NodeIndex, f64> = HashMap::new();

        for &z in &direct {
            let degree = self.graph.neighbors(z).count();
            if degree < 2 {
                continue;
            }
            let weight = 1.0 / (degree as f64).ln();
            for candidate in self.graph.neighbors(z) {
                if candidate == focal_idx || direct.contains(&candidate) {
                    continue;
                }
                *scores.entry(candidate).or_insert(0.0) += weight;
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(idx, score)| (self.graph[idx].clone(), score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}
