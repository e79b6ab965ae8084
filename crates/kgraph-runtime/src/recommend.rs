//! Recommendation methods and the strategies computed from the graph itself.

use std::collections::{HashMap, HashSet};

use kgraph_core::{Error, Result};
use kgraph_gateway::RemoteMethod;
use kgraph_store::{Graph, GraphIndex, Node};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 100;

/// Every recommendation strategy the API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendMethod {
    Similarity,
    LeastSimilar,
    Analogy,
    Tag,
    Recency,
    Structure,
}

impl RecommendMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::LeastSimilar => "least-similar",
            Self::Analogy => "analogy",
            Self::Tag => "tag",
            Self::Recency => "recency",
            Self::Structure => "structure",
        }
    }

    /// The vector service's method, for strategies it computes.
    pub fn remote(&self) -> Option<RemoteMethod> {
        match self {
            Self::Similarity => Some(RemoteMethod::Similarity),
            Self::LeastSimilar => Some(RemoteMethod::LeastSimilar),
            Self::Analogy => Some(RemoteMethod::Analogy),
            Self::Tag | Self::Recency | Self::Structure => None,
        }
    }

    pub fn needs_focal_node(&self) -> bool {
        !matches!(self, Self::Tag | Self::Recency)
    }
}

impl std::str::FromStr for RecommendMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "similarity" | "similarity-based" | "embedding" => Ok(Self::Similarity),
            "least-similar" | "dissimilarity" => Ok(Self::LeastSimilar),
            "analogy" | "analogy-based" | "edge-analogy" => Ok(Self::Analogy),
            "tag" | "tag-based" => Ok(Self::Tag),
            "recency" | "recency-based" => Ok(Self::Recency),
            "structure" | "structure-based" | "graph" => Ok(Self::Structure),
            other => Err(Error::BadRequest(format!(
                "unknown recommendation method '{}'",
                other
            ))),
        }
    }
}

/// Query parameters of a recommendation request, as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest {
    pub method: Option<String>,
    #[serde(alias = "node_id")]
    pub node_id: Option<String>,
    #[serde(alias = "top_k")]
    pub top_k: Option<usize>,
    pub relation: Option<String>,
    pub tag: Option<String>,
}

/// A validated recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendParams {
    pub method: RecommendMethod,
    pub node_id: Option<String>,
    pub top_k: usize,
    pub relation: Option<String>,
    pub tag: Option<String>,
}

impl RecommendRequest {
    pub fn validate(self) -> Result<RecommendParams> {
        let method: RecommendMethod = self
            .method
            .as_deref()
            .ok_or_else(|| Error::BadRequest("recommendations: method is required".into()))?
            .parse()?;
        let node_id = non_blank(self.node_id);
        let relation = non_blank(self.relation);
        let tag = non_blank(self.tag);

        if method.needs_focal_node() && node_id.is_none() {
            return Err(Error::BadRequest(format!(
                "{} recommendations require nodeId",
                method.as_str()
            )));
        }
        if method == RecommendMethod::Analogy && relation.is_none() {
            return Err(Error::BadRequest(
                "analogy recommendations require relation".into(),
            ));
        }
        if method == RecommendMethod::Tag && tag.is_none() {
            return Err(Error::BadRequest("tag recommendations require tag".into()));
        }

        Ok(RecommendParams {
            method,
            node_id,
            top_k: self.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K),
            relation,
            tag,
        })
    }
}

/// Ranked node ids, most relevant first.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub method: RecommendMethod,
    pub ids: Vec<String>,
}

/// Compute a graph-local strategy. Remote methods yield nothing here.
pub fn local(graph: &Graph, params: &RecommendParams) -> Vec<String> {
    let focal = params.node_id.as_deref();
    let ranked = match params.method {
        RecommendMethod::Tag => by_tag(graph, params.tag.as_deref().unwrap_or_default()),
        RecommendMethod::Recency => by_recency(graph),
        RecommendMethod::Structure => by_structure(graph, focal.unwrap_or_default()),
        _ => Vec::new(),
    };
    ranked
        .into_iter()
        .filter(|id| Some(id.as_str()) != focal)
        .take(params.top_k)
        .collect()
}

/// Keep ids that still exist, drop the focal node and duplicates, cap at `top_k`.
pub fn filter_existing<I>(graph: &Graph, ids: I, focal: Option<&str>, top_k: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let present: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        if Some(id.as_str()) == focal || !present.contains(id.as_str()) || out.contains(&id) {
            continue;
        }
        out.push(id);
        if out.len() == top_k {
            break;
        }
    }
    out
}

fn by_tag(graph: &Graph, tag: &str) -> Vec<String> {
    let mut matching: Vec<&Node> = graph
        .nodes
        .iter()
        .filter(|n| n.labels.iter().any(|l| l.eq_ignore_ascii_case(tag)))
        .collect();
    matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    matching.into_iter().map(|n| n.id.clone()).collect()
}

fn by_recency(graph: &Graph) -> Vec<String> {
    let mut nodes: Vec<&Node> = graph.nodes.iter().collect();
    nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    nodes.into_iter().map(|n| n.id.clone()).collect()
}

fn by_structure(graph: &Graph, focal: &str) -> Vec<String> {
    let index = GraphIndex::build(graph);
    let mut scored = index.adamic_adar(focal);
    let created: HashMap<&str, _> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.created_at))
        .collect();
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| created.get(b.0.as_str()).cmp(&created.get(a.0.as_str())))
    });
    scored.into_iter().map(|(id, _)| id).collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kgraph_core::OwnerKey;
    use kgraph_store::{Edge, EmbeddingState};

    fn node(id: &str, labels: &[&str], age_secs: i64) -> Node {
        let at = Utc::now() - Duration::seconds(age_secs);
        Node {
            id: id.into(),
            content: id.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            position: None,
            source_message_id: None,
            source_conversation_id: None,
            embedding_state: EmbeddingState::Embedded,
            embedding_stale: false,
            content_version: 1,
            created_at: at,
            updated_at: at,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        let now = Utc::now();
        Edge {
            id: format!("{}>{}", source, target),
            source: source.into(),
            target: target.into(),
            labels: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Graph {
        let now = Utc::now();
        Graph {
            owner: OwnerKey::user("u1"),
            nodes,
            edges,
            created_at: now,
            updated_at: now,
        }
    }

    fn params(method: RecommendMethod, node_id: Option<&str>, tag: Option<&str>) -> RecommendParams {
        RecommendParams {
            method,
            node_id: node_id.map(String::from),
            top_k: DEFAULT_TOP_K,
            relation: None,
            tag: tag.map(String::from),
        }
    }

    #[test]
    fn test_method_spellings() {
        for (raw, expected) in [
            ("similarity-based", RecommendMethod::Similarity),
            ("embedding", RecommendMethod::Similarity),
            ("edge-analogy", RecommendMethod::Analogy),
            ("Tag-Based", RecommendMethod::Tag),
            ("graph", RecommendMethod::Structure),
            ("recency", RecommendMethod::Recency),
        ] {
            assert_eq!(raw.parse::<RecommendMethod>().unwrap(), expected);
        }
        assert!(matches!(
            "telepathy".parse::<RecommendMethod>(),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_validate_requires_method_params() {
        let missing_relation = RecommendRequest {
            method: Some("analogy".into()),
            node_id: Some("n1".into()),
            ..Default::default()
        };
        assert!(matches!(missing_relation.validate(), Err(Error::BadRequest(_))));

        let missing_node = RecommendRequest {
            method: Some("similarity".into()),
            ..Default::default()
        };
        assert!(matches!(missing_node.validate(), Err(Error::BadRequest(_))));

        let clamped = RecommendRequest {
            method: Some("recency".into()),
            top_k: Some(5000),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(clamped.top_k, MAX_TOP_K);

        let floor = RecommendRequest {
            method: Some("recency".into()),
            top_k: Some(0),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(floor.top_k, 1);
    }

    #[test]
    fn test_tag_without_match_is_empty() {
        let g = graph(vec![node("a", &["idea"], 10)], vec![]);
        assert!(local(&g, &params(RecommendMethod::Tag, None, Some("nonexistent"))).is_empty());
    }

    #[test]
    fn test_tag_is_case_insensitive_newest_first() {
        let g = graph(
            vec![
                node("old", &["Physics"], 100),
                node("new", &["physics"], 1),
                node("other", &["art"], 0),
            ],
            vec![],
        );
        let ids = local(&g, &params(RecommendMethod::Tag, None, Some("PHYSICS")));
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_recency_excludes_focal() {
        let g = graph(
            vec![node("a", &[], 30), node("b", &[], 20), node("c", &[], 10)],
            vec![],
        );
        let ids = local(&g, &params(RecommendMethod::Recency, Some("c"), None));
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_structure_skips_direct_neighbours() {
        let g = graph(
            vec![
                node("a", &[], 50),
                node("b", &[], 40),
                node("c", &[], 30),
                node("d", &[], 20),
            ],
            vec![edge("a", "b"), edge("b", "c"), edge("b", "d")],
        );
        let ids = local(&g, &params(RecommendMethod::Structure, Some("a"), None));
        // c and d tie on score; d is newer
        assert_eq!(ids, vec!["d", "c"]);
    }

    #[test]
    fn test_filter_existing_drops_stale_ids() {
        let g = graph(vec![node("a", &[], 1), node("b", &[], 1)], vec![]);
        let ids = filter_existing(
            &g,
            vec!["gone".to_string(), "b".into(), "a".into(), "b".into()],
            Some("a"),
            10,
        );
        assert_eq!(ids, vec!["b"]);
    }
}
