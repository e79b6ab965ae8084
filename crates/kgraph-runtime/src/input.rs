//! Request payloads and their normalization.
//!
//! Clients send `label` as a string or an array, and some send `idea_text`
//! instead of `content`. Everything is folded into the store's canonical
//! types here and nowhere else.

use kgraph_core::{Error, Result};
use kgraph_store::{normalize_labels, NewNode, NodePatch, Position};
use serde::Deserialize;

/// A label field that is either one string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LabelsInput {
    One(String),
    Many(Vec<String>),
}

impl LabelsInput {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(label) => vec![label],
            Self::Many(labels) => labels,
        }
    }
}

/// `labels` wins over `label` when both are present.
fn merge_label_fields(label: Option<LabelsInput>, labels: Option<LabelsInput>) -> Option<Vec<String>> {
    labels
        .or(label)
        .map(|l| normalize_labels(l.into_vec()))
}

fn require_content(content: Option<String>, what: &str) -> Result<String> {
    let content = content.unwrap_or_default();
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::BadRequest(format!("{}: content must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

fn position_input(x: Option<f64>, y: Option<f64>, what: &str) -> Result<Option<Position>> {
    match (x, y) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(Error::BadRequest(format!(
            "{}: x and y must be given together",
            what
        ))),
        (x, y) => Ok(Position::from_parts(x, y)),
    }
}

/// Body of a node creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeInput {
    #[serde(alias = "idea_text")]
    pub content: Option<String>,
    pub label: Option<LabelsInput>,
    pub labels: Option<LabelsInput>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub source_message_id: Option<String>,
    pub source_conversation_id: Option<String>,
}

impl CreateNodeInput {
    pub fn into_new_node(self) -> Result<NewNode> {
        Ok(NewNode {
            content: require_content(self.content, "create node")?,
            labels: merge_label_fields(self.label, self.labels).unwrap_or_default(),
            position: position_input(self.x, self.y, "create node")?,
            source_message_id: non_blank(self.source_message_id),
            source_conversation_id: non_blank(self.source_conversation_id),
        })
    }
}

/// Body of a partial node update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeInput {
    #[serde(alias = "idea_text")]
    pub content: Option<String>,
    pub label: Option<LabelsInput>,
    pub labels: Option<LabelsInput>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl UpdateNodeInput {
    pub fn into_patch(self) -> Result<NodePatch> {
        let content = match self.content {
            Some(content) => Some(require_content(Some(content), "update node")?),
            None => None,
        };
        let position = match (self.x, self.y) {
            (None, None) => None,
            (x, y) => Some(position_input(x, y, "update node")?),
        };
        Ok(NodePatch {
            content,
            labels: merge_label_fields(self.label, self.labels),
            position,
        })
    }
}

/// One extracted idea awaiting promotion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInput {
    #[serde(alias = "idea_text")]
    pub content: Option<String>,
    pub label: Option<LabelsInput>,
    pub labels: Option<LabelsInput>,
}

/// Body of a batch import: every candidate extracted from one source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportInput {
    #[serde(alias = "messageId")]
    pub source_id: String,
    #[serde(default)]
    pub candidates: Vec<CandidateInput>,
    pub source_conversation_id: Option<String>,
}

impl ImportInput {
    /// Validate every candidate before anything is written.
    pub fn into_new_nodes(self) -> Result<(String, Vec<NewNode>)> {
        let source_id = self.source_id.trim().to_string();
        if source_id.is_empty() {
            return Err(Error::BadRequest("import: sourceId must not be empty".into()));
        }
        if self.candidates.is_empty() {
            return Err(Error::BadRequest(format!(
                "import of {}: no candidates",
                source_id
            )));
        }

        let conversation = non_blank(self.source_conversation_id);
        let mut nodes = Vec::with_capacity(self.candidates.len());
        for (i, candidate) in self.candidates.into_iter().enumerate() {
            let what = format!("import of {}, candidate {}", source_id, i);
            nodes.push(NewNode {
                content: require_content(candidate.content, &what)?,
                labels: merge_label_fields(candidate.label, candidate.labels).unwrap_or_default(),
                position: None,
                source_message_id: Some(source_id.clone()),
                source_conversation_id: conversation.clone(),
            });
        }
        Ok((source_id, nodes))
    }
}

/// Body naming a set of nodes (delete, merge).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdsInput {
    #[serde(default, alias = "ids")]
    pub node_ids: Vec<String>,
}

/// Body addressing an edge by its endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeInput {
    pub source: String,
    pub target: String,
    pub label: Option<LabelsInput>,
    pub labels: Option<LabelsInput>,
}

impl EdgeInput {
    pub fn endpoints(&self) -> Result<(&str, &str)> {
        let source = self.source.trim();
        let target = self.target.trim();
        if source.is_empty() || target.is_empty() {
            return Err(Error::BadRequest("edge: source and target are required".into()));
        }
        Ok((source, target))
    }

    pub fn labels(&self) -> Vec<String> {
        merge_label_fields(self.label.clone(), self.labels.clone()).unwrap_or_default()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
