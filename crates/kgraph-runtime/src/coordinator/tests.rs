use std::sync::Arc;
use std::time::Duration;

use kgraph_core::{EmbeddingPolicies, EmbeddingPolicy, Error, OwnerKey};
use kgraph_store::{Coordinate, EmbeddingState, Position, SqliteGraphStore};
use serde_json::json;
use tempfile::TempDir;

use super::GraphMutationCoordinator;
use crate::input::{CreateNodeInput, EdgeInput, ImportInput, UpdateNodeInput};
use crate::recommend::{RecommendMethod, RecommendRequest};
use crate::testing::Fakes;
use crate::types::CoordinatorSettings;

fn setup(settings: CoordinatorSettings) -> (Arc<GraphMutationCoordinator>, Fakes, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteGraphStore::open(dir.path()).unwrap());
    let fakes = Fakes::new();
    let coordinator = Arc::new(GraphMutationCoordinator::new(store, fakes.gateways(), settings));
    (coordinator, fakes, dir)
}

fn with_policy(policy: EmbeddingPolicy) -> CoordinatorSettings {
    CoordinatorSettings {
        policies: EmbeddingPolicies::uniform(policy),
        ..Default::default()
    }
}

fn owner() -> OwnerKey {
    OwnerKey::user("user-1")
}

fn create(content: &str, labels: &[&str]) -> CreateNodeInput {
    serde_json::from_value(json!({"content": content, "labels": labels})).unwrap()
}

fn update(body: serde_json::Value) -> UpdateNodeInput {
    serde_json::from_value(body).unwrap()
}

fn edge(source: &str, target: &str, labels: &[&str]) -> EdgeInput {
    serde_json::from_value(json!({"source": source, "target": target, "labels": labels})).unwrap()
}

fn import(source: &str, contents: &[&str]) -> ImportInput {
    let candidates: Vec<_> = contents
        .iter()
        .map(|c| json!({"content": c, "label": "idea"}))
        .collect();
    serde_json::from_value(json!({"sourceId": source, "candidates": candidates})).unwrap()
}

fn recommend(method: &str, node_id: Option<&str>) -> RecommendRequest {
    RecommendRequest {
        method: Some(method.into()),
        node_id: node_id.map(String::from),
        ..Default::default()
    }
}

// ---------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------

#[tokio::test]
async fn test_create_then_get_graph() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let node = coord
        .create_node(&owner(), create("Water boils", &["fact"]))
        .await
        .unwrap();

    let graph = coord.get_graph(&owner()).unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert_eq!(graph.nodes[0].id, node.id);
    assert_eq!(graph.nodes[0].content, "Water boils");
    assert_eq!(graph.nodes[0].labels, vec!["fact"]);
    assert_eq!(node.embedding_state, EmbeddingState::Embedded);
    assert_eq!(fakes.embedding.upserted_ids(), vec![node.id.clone()]);
}

#[tokio::test]
async fn test_strict_create_rolls_back() {
    let (coord, fakes, _dir) = setup(with_policy(EmbeddingPolicy::Strict));
    fakes.embedding.set_failing(true);

    let err = coord
        .create_node(&owner(), create("A", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    assert!(coord.get_graph(&owner()).unwrap().nodes.is_empty());
}

#[tokio::test]
async fn test_best_effort_create_flags_stale() {
    let (coord, fakes, _dir) = setup(with_policy(EmbeddingPolicy::BestEffort));
    fakes.embedding.set_failing(true);

    let node = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    assert!(node.embedding_stale);
    assert_eq!(coord.get_graph(&owner()).unwrap().nodes.len(), 1);
}

#[tokio::test]
async fn test_strict_update_reverts_content() {
    let (coord, fakes, _dir) = setup(with_policy(EmbeddingPolicy::Strict));
    let node = coord.create_node(&owner(), create("before", &["x"])).await.unwrap();

    fakes.embedding.set_failing(true);
    let err = coord
        .update_node(&owner(), &node.id, update(json!({"content": "after", "labels": ["y"]})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));

    // only the content is reverted
    let current = coord.store().get_node(&owner(), &node.id).unwrap().unwrap();
    assert_eq!(current.content, "before");
    assert_eq!(current.labels, vec!["y"]);
    assert!(current.embedding_stale);
}

#[tokio::test]
async fn test_store_failure_while_settling_is_not_an_embedding_failure() {
    let (coord, fakes, dir) = setup(with_policy(EmbeddingPolicy::BestEffort));
    let db = rusqlite::Connection::open(dir.path().join("kgraph.db")).unwrap();
    db.execute_batch(
        "CREATE TRIGGER settle_fails BEFORE UPDATE OF embedding_state ON nodes \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();

    // the upsert succeeds; only recording its outcome fails
    let err = coord.create_node(&owner(), create("A", &[])).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)), "{}", err);
    assert_eq!(fakes.embedding.upsert_calls(), 1);
}

#[tokio::test]
async fn test_strict_update_revert_keeps_concurrent_labels() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings {
        policies: EmbeddingPolicies {
            update: EmbeddingPolicy::Strict,
            ..Default::default()
        },
        ..Default::default()
    });
    let node = coord.create_node(&owner(), create("before", &["orig"])).await.unwrap();
    let hold = fakes.embedding.hold_next();

    let task = {
        let coord = coord.clone();
        let id = node.id.clone();
        tokio::spawn(async move {
            coord
                .update_node(&owner(), &id, update(json!({"content": "after"})))
                .await
        })
    };
    hold.entered.notified().await;

    // another tab relabels the node while the upsert is out
    coord
        .update_node(&owner(), &node.id, update(json!({"labels": ["tab2"]})))
        .await
        .unwrap();
    fakes.embedding.set_failing(true);
    hold.release.notify_one();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    let current = coord.store().get_node(&owner(), &node.id).unwrap().unwrap();
    assert_eq!(current.content, "before");
    assert_eq!(current.labels, vec!["tab2"]);
}

#[tokio::test]
async fn test_best_effort_update_keeps_content() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let node = coord.create_node(&owner(), create("before", &[])).await.unwrap();

    fakes.embedding.set_failing(true);
    let updated = coord
        .update_node(&owner(), &node.id, update(json!({"content": "after"})))
        .await
        .unwrap();
    assert_eq!(updated.content, "after");
    assert!(updated.embedding_stale);
}

#[tokio::test]
async fn test_label_update_skips_embedding() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let node = coord.create_node(&owner(), create("A", &[])).await.unwrap();

    let updated = coord
        .update_node(&owner(), &node.id, update(json!({"label": "renamed", "x": 5.0, "y": 6.0})))
        .await
        .unwrap();
    assert_eq!(updated.labels, vec!["renamed"]);
    assert_eq!(updated.position, Some(Position { x: 5.0, y: 6.0 }));
    assert_eq!(updated.embedding_state, EmbeddingState::Embedded);
    assert_eq!(fakes.embedding.upsert_calls(), 1);

    let err = coord
        .update_node(&owner(), &node.id, update(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[tokio::test]
async fn test_other_owner_sees_not_found() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    let node = coord.create_node(&owner(), create("private", &[])).await.unwrap();
    let intruder = OwnerKey::user("user-2");

    let err = coord
        .update_node(&intruder, &node.id, update(json!({"content": "mine"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(coord.get_graph(&intruder).unwrap().nodes.is_empty());
}

#[tokio::test]
async fn test_superseded_embed_ends_stale_then_reconciles() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings {
        pending_grace: Duration::ZERO,
        ..Default::default()
    });
    let hold = fakes.embedding.hold_next();

    let task = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.create_node(&owner(), create("v1", &[])).await })
    };
    hold.entered.notified().await;

    let id = coord.get_graph(&owner()).unwrap().nodes[0].id.clone();
    coord
        .update_node(&owner(), &id, update(json!({"content": "v2"})))
        .await
        .unwrap();
    hold.release.notify_one();
    task.await.unwrap().unwrap();

    // the v1 upsert may have landed after v2's
    let node = coord.store().get_node(&owner(), &id).unwrap().unwrap();
    assert_eq!(node.content, "v2");
    assert_eq!(node.embedding_state, EmbeddingState::Stale);

    let report = coord.reconcile(&owner()).await.unwrap();
    assert_eq!(report.embedded, 1);
    let node = coord.store().get_node(&owner(), &id).unwrap().unwrap();
    assert_eq!(node.embedding_state, EmbeddingState::Embedded);
}

// ---------------------------------------------------------------
// Import
// ---------------------------------------------------------------

#[tokio::test]
async fn test_import_twice_conflicts() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let nodes = coord
        .import_nodes(&owner(), import("msg-1", &["one", "two", "three"]))
        .await
        .unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(fakes.embedding.upsert_calls(), 1);

    let err = coord
        .import_nodes(&owner(), import("msg-1", &["one", "two", "three"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(coord.get_graph(&owner()).unwrap().nodes.len(), 3);
}

#[tokio::test]
async fn test_strict_import_failure_allows_retry() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    fakes.embedding.set_failing(true);
    let err = coord
        .import_nodes(&owner(), import("msg-1", &["one", "two"]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(coord.get_graph(&owner()).unwrap().nodes.is_empty());

    fakes.embedding.set_failing(false);
    let nodes = coord
        .import_nodes(&owner(), import("msg-1", &["one", "two"]))
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.source_message_id.as_deref() == Some("msg-1")));
}

// ---------------------------------------------------------------
// Delete & edges
// ---------------------------------------------------------------

#[tokio::test]
async fn test_delete_removes_edges_and_vectors() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    let b = coord.create_node(&owner(), create("B", &[])).await.unwrap();
    coord.add_edge(&owner(), &edge(&a.id, &b.id, &["rel"])).unwrap();

    let deletion = coord.delete_nodes(&owner(), &[a.id.clone()]).await.unwrap();
    assert_eq!(deletion.dropped_edges, 1);
    assert!(coord.get_graph(&owner()).unwrap().edges.is_empty());
    assert_eq!(fakes.embedding.deleted_ids(), vec![a.id.clone()]);

    let again = coord.delete_nodes(&owner(), &[a.id.clone()]).await.unwrap();
    assert_eq!(again.count(), 0);
    assert!(matches!(
        coord.delete_nodes(&owner(), &[]).await,
        Err(Error::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_delete_succeeds_when_vector_delete_fails() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    fakes.embedding.set_failing(true);

    let deletion = coord.delete_nodes(&owner(), &[a.id.clone()]).await.unwrap();
    assert_eq!(deletion.count(), 1);
}

#[tokio::test]
async fn test_self_loops_follow_configuration() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    assert!(matches!(
        coord.add_edge(&owner(), &edge(&a.id, &a.id, &[])),
        Err(Error::BadRequest(_))
    ));

    let (coord, _fakes, _dir2) = setup(CoordinatorSettings {
        allow_self_loops: true,
        ..Default::default()
    });
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    coord.add_edge(&owner(), &edge(&a.id, &a.id, &["self"])).unwrap();
    let graph = coord.get_graph(&owner()).unwrap();
    assert_eq!(graph.edge(&a.id, &a.id).unwrap().labels, vec!["self"]);
}

#[tokio::test]
async fn test_relabel_scenario() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    let n1 = coord.create_node(&owner(), create("n1", &[])).await.unwrap();
    let n2 = coord.create_node(&owner(), create("n2", &[])).await.unwrap();

    let first = coord.add_edge(&owner(), &edge(&n1.id, &n2.id, &["cause"])).unwrap();
    assert!(first.created);
    let relabeled = coord
        .replace_edge_labels(&owner(), &edge(&n1.id, &n2.id, &["effect", "note"]))
        .unwrap();
    assert_eq!(relabeled.labels, vec!["effect", "note"]);

    let graph = coord.get_graph(&owner()).unwrap();
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].labels, vec!["effect", "note"]);

    coord.delete_edge(&owner(), &edge(&n1.id, &n2.id, &[])).unwrap();
    assert!(coord.get_graph(&owner()).unwrap().edges.is_empty());
}

#[tokio::test]
async fn test_concurrent_edge_appends_converge() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    let b = coord.create_node(&owner(), create("B", &[])).await.unwrap();

    let handles: Vec<_> = ["x", "y", "z", "x"]
        .into_iter()
        .map(|label| {
            let coord = coord.clone();
            let input = edge(&a.id, &b.id, &[label]);
            tokio::spawn(async move { coord.add_edge(&owner(), &input).unwrap() })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let graph = coord.get_graph(&owner()).unwrap();
    assert_eq!(graph.edges.len(), 1);
    let mut labels = graph.edges[0].labels.clone();
    labels.sort();
    assert_eq!(labels, vec!["x", "y", "z"]);
}

// ---------------------------------------------------------------
// Merge
// ---------------------------------------------------------------

#[tokio::test]
async fn test_merge_reports_dropped_edges() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &["x"])).await.unwrap();
    let b = coord.create_node(&owner(), create("B", &["y", "x"])).await.unwrap();
    let c = coord.create_node(&owner(), create("C", &[])).await.unwrap();
    coord.add_edge(&owner(), &edge(&a.id, &c.id, &[])).unwrap();
    coord.add_edge(&owner(), &edge(&c.id, &b.id, &[])).unwrap();

    let outcome = coord
        .merge_nodes(&owner(), &[a.id.clone(), b.id.clone(), a.id.clone()])
        .await
        .unwrap();
    assert_eq!(outcome.node.content, "A\n\nB");
    assert_eq!(outcome.node.labels, vec!["x", "y"]);
    assert_eq!(outcome.merged_ids, vec![a.id.clone(), b.id.clone()]);
    assert_eq!(outcome.dropped_edges, 2);

    let graph = coord.get_graph(&owner()).unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert!(graph.edges.is_empty());
    let mut deleted = fakes.embedding.deleted_ids();
    deleted.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(deleted, expected);
}

#[tokio::test]
async fn test_merge_validation() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    let b = coord.create_node(&owner(), create("B", &[])).await.unwrap();

    assert!(matches!(
        coord.merge_nodes(&owner(), &[a.id.clone(), a.id.clone()]).await,
        Err(Error::BadRequest(_))
    ));
    assert!(matches!(
        coord.merge_nodes(&owner(), &[a.id.clone(), "ghost".into()]).await,
        Err(Error::NotFound(_))
    ));

    // strict merge failure leaves the originals in place
    fakes.embedding.set_failing(true);
    assert!(coord
        .merge_nodes(&owner(), &[a.id.clone(), b.id.clone()])
        .await
        .is_err());
    assert_eq!(coord.get_graph(&owner()).unwrap().nodes.len(), 2);
}

// ---------------------------------------------------------------
// Layout
// ---------------------------------------------------------------

#[tokio::test]
async fn test_layout_applies_known_ids_only() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    fakes.layout.set_coords(vec![
        Coordinate { id: a.id.clone(), x: 1.0, y: 2.0 },
        Coordinate { id: "gone".into(), x: 3.0, y: 4.0 },
    ]);

    let applied = coord.recompute_layout(&owner()).await.unwrap();
    assert_eq!(applied.len(), 1);
    let node = coord.store().get_node(&owner(), &a.id).unwrap().unwrap();
    assert_eq!(node.position, Some(Position { x: 1.0, y: 2.0 }));
}

#[tokio::test]
async fn test_layout_failure_keeps_positions() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let input: CreateNodeInput =
        serde_json::from_value(json!({"content": "A", "x": 7.0, "y": 8.0})).unwrap();
    let a = coord.create_node(&owner(), input).await.unwrap();
    fakes.layout.set_failing(true);

    let err = coord.recompute_layout(&owner()).await.unwrap_err();
    assert!(matches!(err, Error::LayoutUnavailable(_)));
    let node = coord.store().get_node(&owner(), &a.id).unwrap().unwrap();
    assert_eq!(node.position, Some(Position { x: 7.0, y: 8.0 }));

    fakes.layout.set_failing(false);
    assert!(coord.recompute_layout(&owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_layout_locks_are_released() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    for user in ["u1", "u2", "u3"] {
        coord.recompute_layout(&OwnerKey::user(user)).await.unwrap();
    }
    assert!(coord.layout_locks.is_empty());
}

// ---------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------

#[tokio::test]
async fn test_tag_recommendation_without_match() {
    let (coord, _fakes, _dir) = setup(CoordinatorSettings::default());
    coord.create_node(&owner(), create("A", &["idea"])).await.unwrap();

    let request = RecommendRequest {
        method: Some("tag-based".into()),
        tag: Some("nonexistent".into()),
        ..Default::default()
    };
    let result = coord.recommend(&owner(), request).await.unwrap();
    assert_eq!(result.method, RecommendMethod::Tag);
    assert!(result.ids.is_empty());
}

#[tokio::test]
async fn test_recommend_for_unknown_owner_creates_nothing() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let result = coord
        .recommend(&owner(), recommend("recency", None))
        .await
        .unwrap();
    assert!(result.ids.is_empty());
    let err = coord
        .recommend(&owner(), recommend("similarity", Some("n1")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(fakes.recommend.last_query().is_none());
    assert_eq!(coord.stats().unwrap().graphs, 0);
}

#[tokio::test]
async fn test_remote_recommendations_are_filtered() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();
    let b = coord.create_node(&owner(), create("B", &[])).await.unwrap();
    fakes
        .recommend
        .set_ids(&["deleted-node", a.id.as_str(), b.id.as_str()]);

    let result = coord
        .recommend(&owner(), recommend("similarity-based", Some(&a.id)))
        .await
        .unwrap();
    assert_eq!(result.ids, vec![b.id.clone()]);
    assert_eq!(fakes.recommend.last_query().unwrap().top_k, 10);

    let err = coord
        .recommend(&owner(), recommend("similarity", Some("missing")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    fakes.recommend.set_failing(true);
    let err = coord
        .recommend(&owner(), recommend("embedding", Some(&a.id)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecommendationUnavailable(_)));
}

#[tokio::test]
async fn test_analogy_passes_relation() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings::default());
    let a = coord.create_node(&owner(), create("A", &[])).await.unwrap();

    let request = RecommendRequest {
        method: Some("edge-analogy".into()),
        node_id: Some(a.id.clone()),
        relation: Some("causes".into()),
        top_k: Some(3),
        ..Default::default()
    };
    coord.recommend(&owner(), request).await.unwrap();
    let query = fakes.recommend.last_query().unwrap();
    assert_eq!(query.relation.as_deref(), Some("causes"));
    assert_eq!(query.top_k, 3);
}

// ---------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------

#[tokio::test]
async fn test_reconcile_all_repairs_stale_nodes() {
    let (coord, fakes, _dir) = setup(CoordinatorSettings {
        policies: EmbeddingPolicies::uniform(EmbeddingPolicy::BestEffort),
        ..Default::default()
    });
    fakes.embedding.set_failing(true);
    coord.create_node(&owner(), create("A", &[])).await.unwrap();
    coord
        .create_node(&OwnerKey::user("user-2"), create("B", &[]))
        .await
        .unwrap();

    let failed = coord.reconcile_all().await.unwrap();
    assert_eq!(failed.failures, 2);
    assert_eq!(failed.stale, 2);

    fakes.embedding.set_failing(false);
    let report = coord.reconcile_all().await.unwrap();
    assert_eq!(report.owners, 2);
    assert_eq!(report.embedded, 2);
    assert_eq!(coord.stats().unwrap().stale_nodes, 0);

    let idle = coord.reconcile_all().await.unwrap();
    assert_eq!(idle.candidates, 0);
}
