//! Scripted in-process gateways for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kgraph_core::{Error, OwnerKey, Result};
use kgraph_gateway::{
    EmbeddingDocument, EmbeddingGateway, Gateways, LayoutGateway, RecommendationGateway,
    RemoteQuery, ScoredId,
};
use kgraph_store::Coordinate;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Pauses the next upsert until released.
pub struct Hold {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct ScriptedEmbedding {
    failing: AtomicBool,
    upsert_calls: AtomicUsize,
    upserted: Mutex<Vec<EmbeddingDocument>>,
    deleted: Mutex<Vec<String>>,
    hold: Mutex<Option<Hold>>,
}

impl ScriptedEmbedding {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn upserted_ids(&self) -> Vec<String> {
        self.upserted.lock().iter().map(|d| d.id.clone()).collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Make the next upsert wait. Await `entered`, then notify `release`.
    pub fn hold_next(&self) -> Hold {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock() = Some(Hold {
            entered: entered.clone(),
            release: release.clone(),
        });
        Hold { entered, release }
    }
}

#[async_trait]
impl EmbeddingGateway for ScriptedEmbedding {
    async fn upsert(&self, _owner: &OwnerKey, docs: &[EmbeddingDocument]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().take();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("scripted outage".into()));
        }
        self.upserted.lock().extend(docs.iter().cloned());
        Ok(())
    }

    async fn delete(&self, _owner: &OwnerKey, ids: &[String]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("scripted outage".into()));
        }
        self.deleted.lock().extend(ids.iter().cloned());
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedLayout {
    coords: Mutex<Vec<Coordinate>>,
    failing: AtomicBool,
}

impl ScriptedLayout {
    pub fn set_coords(&self, coords: Vec<Coordinate>) {
        *self.coords.lock() = coords;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LayoutGateway for ScriptedLayout {
    async fn project(&self, _owner: &OwnerKey) -> Result<Vec<Coordinate>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::LayoutUnavailable("scripted outage".into()));
        }
        Ok(self.coords.lock().clone())
    }
}

#[derive(Default)]
pub struct ScriptedRecommend {
    results: Mutex<Vec<ScoredId>>,
    last_query: Mutex<Option<RemoteQuery>>,
    failing: AtomicBool,
}

impl ScriptedRecommend {
    pub fn set_ids(&self, ids: &[&str]) {
        *self.results.lock() = ids
            .iter()
            .enumerate()
            .map(|(i, id)| ScoredId {
                id: id.to_string(),
                score: 1.0 - i as f64 * 0.01,
            })
            .collect();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn last_query(&self) -> Option<RemoteQuery> {
        self.last_query.lock().clone()
    }
}

#[async_trait]
impl RecommendationGateway for ScriptedRecommend {
    async fn recommend(&self, _owner: &OwnerKey, query: &RemoteQuery) -> Result<Vec<ScoredId>> {
        *self.last_query.lock() = Some(query.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::RecommendationUnavailable("scripted outage".into()));
        }
        Ok(self.results.lock().clone())
    }
}

/// One of each scripted gateway.
#[derive(Clone, Default)]
pub struct Fakes {
    pub embedding: Arc<ScriptedEmbedding>,
    pub layout: Arc<ScriptedLayout>,
    pub recommend: Arc<ScriptedRecommend>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateways(&self) -> Gateways {
        Gateways {
            embedding: self.embedding.clone(),
            layout: self.layout.clone(),
            recommend: self.recommend.clone(),
        }
    }
}
