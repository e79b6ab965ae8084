//! SQLite-backed graph store.
//!
//! Every graph document is one row in `graphs`; its nodes and edges are rows
//! keyed by id. Each mutating call runs in a single transaction while the
//! connection mutex is held, so mutations of one graph are linearizable and
//! nothing is ever held across a network call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kgraph_core::{Error, OwnerKey, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schema::SCHEMA_SQL;
use crate::types::*;

/// Durable store of one graph document per owner key.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

struct GraphRow {
    id: i64,
    created_at: i64,
    updated_at: i64,
}

impl SqliteGraphStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the directory (e.g., `data/graphdb/`). The file will be `db_dir/kgraph.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("kgraph.db");

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let stats = store.stats()?;
        info!(
            "SqliteGraphStore initialized: {} graphs, {} nodes, {} edges, path={}",
            stats.graphs,
            stats.nodes,
            stats.edges,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    // ---------------------------------------------------------------
    // Graph documents
    // ---------------------------------------------------------------

    /// Return the owner's graph, creating an empty one on first access.
    pub fn get_or_create(&self, owner: &OwnerKey) -> Result<Graph> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = Self::ensure_graph(&tx, owner)?;
        let nodes = Self::load_nodes(&tx, graph.id)?;
        let edges = Self::load_edges(&tx, graph.id)?;
        tx.commit().map_err(db_err)?;

        Ok(Graph {
            owner: owner.clone(),
            nodes,
            edges,
            created_at: to_datetime(graph.created_at),
            updated_at: to_datetime(graph.updated_at),
        })
    }

    /// Return the owner's graph if it was ever created.
    pub fn find(&self, owner: &OwnerKey) -> Result<Option<Graph>> {
        let conn = self.conn.lock();
        let Some(graph) = Self::find_graph(&conn, owner)? else {
            return Ok(None);
        };
        Ok(Some(Graph {
            owner: owner.clone(),
            nodes: Self::load_nodes(&conn, graph.id)?,
            edges: Self::load_edges(&conn, graph.id)?,
            created_at: to_datetime(graph.created_at),
            updated_at: to_datetime(graph.updated_at),
        }))
    }

    /// Upsert the graph row. Never read-then-insert.
    fn ensure_graph(conn: &Connection, owner: &OwnerKey) -> Result<GraphRow> {
        let now = now_millis();
        conn.prepare_cached(
            "INSERT INTO graphs (user_id, scope, created_at, updated_at) VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(user_id, scope) DO NOTHING",
        )
        .map_err(db_err)?
        .execute(params![owner.user_id, owner.scope, now])
        .map_err(db_err)?;

        Self::find_graph(conn, owner)?.ok_or_else(|| {
            Error::Database(format!("graph {} missing right after upsert", owner))
        })
    }

    /// Look the graph row up without creating it. Read paths use this so that
    /// a stray id never materializes an empty graph.
    fn find_graph(conn: &Connection, owner: &OwnerKey) -> Result<Option<GraphRow>> {
        conn.prepare_cached(
            "SELECT id, created_at, updated_at FROM graphs WHERE user_id = ?1 AND scope = ?2",
        )
        .map_err(db_err)?
        .query_row(params![owner.user_id, owner.scope], |row| {
            Ok(GraphRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })
        .optional()
        .map_err(db_err)
    }

    fn touch_graph(conn: &Connection, graph_id: i64, now: i64) -> Result<()> {
        conn.prepare_cached("UPDATE graphs SET updated_at = ?1 WHERE id = ?2")
            .map_err(db_err)?
            .execute(params![now, graph_id])
            .map_err(db_err)?;
        Ok(())
    }

    fn load_nodes(conn: &Connection, graph_id: i64) -> Result<Vec<Node>> {
        let mut stmt = conn
            .prepare_cached("SELECT * FROM nodes WHERE graph_id = ?1 ORDER BY created_at, rowid")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![graph_id], |row| Ok(Self::row_to_node(row)))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn load_edges(conn: &Connection, graph_id: i64) -> Result<Vec<Edge>> {
        let mut stmt = conn
            .prepare_cached("SELECT * FROM edges WHERE graph_id = ?1 ORDER BY created_at, rowid")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![graph_id], |row| Ok(Self::row_to_edge(row)))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------

    /// Append a node with a freshly generated id.
    pub fn add_node(&self, owner: &OwnerKey, node: NewNode) -> Result<Node> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = Self::ensure_graph(&tx, owner)?;
        let created = Self::insert_node(&tx, graph.id, &node, now)?;
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;

        debug!("Added node {} to graph {}", created.id, owner);
        Ok(created)
    }

    fn insert_node(conn: &Connection, graph_id: i64, node: &NewNode, now: i64) -> Result<Node> {
        let id = Uuid::new_v4().to_string();
        let labels_json = serde_json::to_string(&node.labels)?;
        let (x, y) = split_position(node.position);

        conn.prepare_cached(
            "INSERT INTO nodes (id, graph_id, content, labels_json, x, y, source_message_id, \
             source_conversation_id, embedding_state, content_version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 1, ?9, ?9)",
        )
        .map_err(db_err)?
        .execute(params![
            id,
            graph_id,
            node.content,
            labels_json,
            x,
            y,
            node.source_message_id,
            node.source_conversation_id,
            now,
        ])
        .map_err(db_err)?;

        Ok(Node {
            id,
            content: node.content.clone(),
            labels: node.labels.clone(),
            position: node.position,
            source_message_id: node.source_message_id.clone(),
            source_conversation_id: node.source_conversation_id.clone(),
            embedding_state: EmbeddingState::Pending,
            embedding_stale: false,
            content_version: 1,
            created_at: to_datetime(now),
            updated_at: to_datetime(now),
        })
    }

    /// Get a node of the owner's graph.
    pub fn get_node(&self, owner: &OwnerKey, node_id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock();
        let graph = match Self::find_graph(&conn, owner)? {
            Some(graph) => graph,
            None => return Ok(None),
        };
        Self::fetch_node(&conn, graph.id, node_id)
    }

    /// Get several nodes; ids that do not exist in the owner's graph are skipped.
    pub fn get_nodes(&self, owner: &OwnerKey, node_ids: &[String]) -> Result<Vec<Node>> {
        let conn = self.conn.lock();
        let graph = match Self::find_graph(&conn, owner)? {
            Some(graph) => graph,
            None => return Ok(Vec::new()),
        };
        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            if let Some(node) = Self::fetch_node(&conn, graph.id, id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn fetch_node(conn: &Connection, graph_id: i64, node_id: &str) -> Result<Option<Node>> {
        conn.prepare_cached("SELECT * FROM nodes WHERE id = ?1 AND graph_id = ?2")
            .map_err(db_err)?
            .query_row(params![node_id, graph_id], |row| Ok(Self::row_to_node(row)))
            .optional()
            .map_err(db_err)
    }

    fn write_node(conn: &Connection, graph_id: i64, node: &Node) -> Result<()> {
        let labels_json = serde_json::to_string(&node.labels)?;
        let (x, y) = split_position(node.position);
        conn.prepare_cached(
            "UPDATE nodes SET content = ?1, labels_json = ?2, x = ?3, y = ?4, \
             embedding_state = ?5, content_version = ?6, updated_at = ?7 \
             WHERE id = ?8 AND graph_id = ?9",
        )
        .map_err(db_err)?
        .execute(params![
            node.content,
            labels_json,
            x,
            y,
            node.embedding_state.as_str(),
            node.content_version,
            node.updated_at.timestamp_millis(),
            node.id,
            graph_id,
        ])
        .map_err(db_err)?;
        Ok(())
    }

    /// Apply only the provided fields.
    ///
    /// A content change bumps `content_version` and puts the node back to
    /// `pending`; callers re-embed when `content_changed` is set.
    pub fn update_node(&self, owner: &OwnerKey, node_id: &str, patch: NodePatch) -> Result<NodeUpdate> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let previous = match Self::find_graph(&tx, owner)? {
            Some(graph) => Self::fetch_node(&tx, graph.id, node_id)?.map(|node| (graph, node)),
            None => None,
        };
        let (graph, previous) =
            previous.ok_or_else(|| Error::NotFound(format!("node {} (update_node)", node_id)))?;

        let mut node = previous.clone();
        let content_changed = match patch.content {
            Some(content) if content != previous.content => {
                node.content = content;
                true
            }
            _ => false,
        };
        if let Some(labels) = patch.labels {
            node.labels = labels;
        }
        if let Some(position) = patch.position {
            node.position = position;
        }
        if content_changed {
            node.content_version += 1;
            node.embedding_state = EmbeddingState::Pending;
        }
        node.embedding_stale = node.embedding_state == EmbeddingState::Stale;
        node.updated_at = to_datetime(now);

        Self::write_node(&tx, graph.id, &node)?;
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;

        Ok(NodeUpdate {
            node,
            previous,
            content_changed,
        })
    }

    /// Put a node's content back to `previous_content`, if nobody changed
    /// the content since.
    ///
    /// Applies only while the node still carries `expected_version`; returns
    /// whether the revert happened. Labels and position are left as they are,
    /// so edits made while the embed call was out survive. The version moves
    /// forward so that any embed call still in flight for the reverted content
    /// settles as stale, and the restored node is itself `stale`: a timed-out
    /// upsert may have reached the index after all.
    pub fn restore_content(
        &self,
        owner: &OwnerKey,
        node_id: &str,
        previous_content: &str,
        expected_version: i64,
    ) -> Result<bool> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Ok(false),
        };
        let count = tx
            .prepare_cached(
                "UPDATE nodes SET content = ?1, content_version = ?2, embedding_state = 'stale', \
                 updated_at = ?3 WHERE id = ?4 AND graph_id = ?5 AND content_version = ?6",
            )
            .map_err(db_err)?
            .execute(params![
                previous_content,
                expected_version + 1,
                now,
                node_id,
                graph.id,
                expected_version,
            ])
            .map_err(db_err)?;
        if count == 0 {
            return Ok(false);
        }
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Remove nodes and every edge touching them, atomically.
    ///
    /// Ids that do not exist in the owner's graph are ignored.
    pub fn delete_nodes(&self, owner: &OwnerKey, node_ids: &[String]) -> Result<NodeDeletion> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Ok(NodeDeletion::default()),
        };

        let mut deletion = NodeDeletion::default();
        let mut seen = HashSet::new();
        for id in node_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let edges = tx
                .prepare_cached(
                    "DELETE FROM edges WHERE graph_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
                )
                .map_err(db_err)?
                .execute(params![graph.id, id])
                .map_err(db_err)?;
            let removed = tx
                .prepare_cached("DELETE FROM nodes WHERE id = ?1 AND graph_id = ?2")
                .map_err(db_err)?
                .execute(params![id, graph.id])
                .map_err(db_err)?;
            if removed > 0 {
                deletion.removed.push(id.clone());
                deletion.dropped_edges += edges;
            }
        }

        if !deletion.removed.is_empty() {
            Self::touch_graph(&tx, graph.id, now)?;
        }
        tx.commit().map_err(db_err)?;

        debug!(
            "Deleted {} nodes ({} edges) from graph {}",
            deletion.count(),
            deletion.dropped_edges,
            owner
        );
        Ok(deletion)
    }

    // ---------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------

    /// Create the edge for `(source, target)` or append labels to it.
    pub fn add_or_append_edge(
        &self,
        owner: &OwnerKey,
        source: &str,
        target: &str,
        labels: &[String],
    ) -> Result<EdgeWrite> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Err(Error::NotFound(format!(
                "node {} (add_edge {} -> {})",
                source, source, target
            ))),
        };

        for endpoint in [source, target] {
            if Self::fetch_node(&tx, graph.id, endpoint)?.is_none() {
                return Err(Error::NotFound(format!(
                    "node {} (add_edge {} -> {})",
                    endpoint, source, target
                )));
            }
        }

        let write = match Self::fetch_edge(&tx, graph.id, source, target)? {
            Some(mut edge) => {
                let merged = union_labels(&edge.labels, labels);
                if merged != edge.labels {
                    edge.labels = merged;
                    edge.updated_at = to_datetime(now);
                    Self::write_edge_labels(&tx, graph.id, &edge)?;
                }
                EdgeWrite { edge, created: false }
            }
            None => {
                let edge = Edge {
                    id: Uuid::new_v4().to_string(),
                    source: source.to_string(),
                    target: target.to_string(),
                    labels: normalize_labels(labels),
                    created_at: to_datetime(now),
                    updated_at: to_datetime(now),
                };
                tx.prepare_cached(
                    "INSERT INTO edges (id, graph_id, source_id, target_id, labels_json, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                )
                .map_err(db_err)?
                .execute(params![
                    edge.id,
                    graph.id,
                    edge.source,
                    edge.target,
                    serde_json::to_string(&edge.labels)?,
                    now,
                ])
                .map_err(db_err)?;
                EdgeWrite { edge, created: true }
            }
        };

        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;
        Ok(write)
    }

    /// Replace the whole label set of an existing edge.
    pub fn replace_edge_labels(
        &self,
        owner: &OwnerKey,
        source: &str,
        target: &str,
        labels: &[String],
    ) -> Result<Edge> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let found = match Self::find_graph(&tx, owner)? {
            Some(graph) => Self::fetch_edge(&tx, graph.id, source, target)?.map(|e| (graph, e)),
            None => None,
        };
        let (graph, mut edge) = found.ok_or_else(|| {
            Error::NotFound(format!("edge {} -> {} (replace_edge_labels)", source, target))
        })?;

        edge.labels = normalize_labels(labels);
        edge.updated_at = to_datetime(now);
        Self::write_edge_labels(&tx, graph.id, &edge)?;
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;
        Ok(edge)
    }

    /// Delete the edge for `(source, target)`.
    pub fn delete_edge(&self, owner: &OwnerKey, source: &str, target: &str) -> Result<()> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Err(Error::NotFound(format!(
                "edge {} -> {} (delete_edge)",
                source, target
            ))),
        };
        let count = tx
            .prepare_cached(
                "DELETE FROM edges WHERE graph_id = ?1 AND source_id = ?2 AND target_id = ?3",
            )
            .map_err(db_err)?
            .execute(params![graph.id, source, target])
            .map_err(db_err)?;
        if count == 0 {
            return Err(Error::NotFound(format!(
                "edge {} -> {} (delete_edge)",
                source, target
            )));
        }
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn fetch_edge(conn: &Connection, graph_id: i64, source: &str, target: &str) -> Result<Option<Edge>> {
        conn.prepare_cached(
            "SELECT * FROM edges WHERE graph_id = ?1 AND source_id = ?2 AND target_id = ?3",
        )
        .map_err(db_err)?
        .query_row(params![graph_id, source, target], |row| Ok(Self::row_to_edge(row)))
        .optional()
        .map_err(db_err)
    }

    fn write_edge_labels(conn: &Connection, graph_id: i64, edge: &Edge) -> Result<()> {
        conn.prepare_cached(
            "UPDATE edges SET labels_json = ?1, updated_at = ?2 WHERE id = ?3 AND graph_id = ?4",
        )
        .map_err(db_err)?
        .execute(params![
            serde_json::to_string(&edge.labels)?,
            edge.updated_at.timestamp_millis(),
            edge.id,
            graph_id,
        ])
        .map_err(db_err)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Layout
    // ---------------------------------------------------------------

    /// Bulk coordinate update. Unknown ids and non-finite values are skipped.
    ///
    /// Returns the coordinates that were applied.
    pub fn apply_layout(&self, owner: &OwnerKey, coords: &[Coordinate]) -> Result<Vec<Coordinate>> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Ok(Vec::new()),
        };

        let mut applied = Vec::with_capacity(coords.len());
        for coord in coords {
            if !coord.x.is_finite() || !coord.y.is_finite() {
                continue;
            }
            let count = tx
                .prepare_cached(
                    "UPDATE nodes SET x = ?1, y = ?2, updated_at = ?3 WHERE id = ?4 AND graph_id = ?5",
                )
                .map_err(db_err)?
                .execute(params![coord.x, coord.y, now, coord.id, graph.id])
                .map_err(db_err)?;
            if count > 0 {
                applied.push(coord.clone());
            }
        }

        if !applied.is_empty() {
            Self::touch_graph(&tx, graph.id, now)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(applied)
    }

    // ---------------------------------------------------------------
    // Batch import
    // ---------------------------------------------------------------

    /// Record `source_id` as imported and insert its nodes, in one transaction.
    ///
    /// Fails with `Conflict` (and writes nothing) if the source was imported before.
    pub fn import_nodes(&self, owner: &OwnerKey, source_id: &str, nodes: Vec<NewNode>) -> Result<Vec<Node>> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = Self::ensure_graph(&tx, owner)?;

        let recorded = tx
            .prepare_cached(
                "INSERT INTO imported_sources (graph_id, source_id, node_count, imported_at) \
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT(graph_id, source_id) DO NOTHING",
            )
            .map_err(db_err)?
            .execute(params![graph.id, source_id, nodes.len() as i64, now])
            .map_err(db_err)?;
        if recorded == 0 {
            return Err(Error::Conflict(format!(
                "source {} already imported into graph {}",
                source_id, owner
            )));
        }

        let mut created = Vec::with_capacity(nodes.len());
        for node in &nodes {
            created.push(Self::insert_node(&tx, graph.id, node, now)?);
        }
        Self::touch_graph(&tx, graph.id, now)?;
        tx.commit().map_err(db_err)?;

        info!(
            "Imported {} nodes from source {} into graph {}",
            created.len(),
            source_id,
            owner
        );
        Ok(created)
    }

    /// Drop the import record of a source so it can be imported again.
    pub fn forget_import(&self, owner: &OwnerKey, source_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let graph = match Self::find_graph(&conn, owner)? {
            Some(graph) => graph,
            None => return Ok(false),
        };
        let count = conn
            .prepare_cached("DELETE FROM imported_sources WHERE graph_id = ?1 AND source_id = ?2")
            .map_err(db_err)?
            .execute(params![graph.id, source_id])
            .map_err(db_err)?;
        Ok(count > 0)
    }

    // ---------------------------------------------------------------
    // Embedding bookkeeping
    // ---------------------------------------------------------------

    /// Record the outcome of an embed call.
    ///
    /// On success a node becomes `embedded` only if it is still `pending` at
    /// the ticket's content version. A node whose content moved on since the
    /// call was made becomes `stale`, because the index may now hold the older
    /// text. On failure every ticketed node that still exists becomes `stale`.
    pub fn settle_embedding(
        &self,
        owner: &OwnerKey,
        tickets: &[EmbeddingTicket],
        succeeded: bool,
    ) -> Result<SettleReport> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Ok(SettleReport::default()),
        };

        let mut report = SettleReport::default();
        for ticket in tickets {
            if succeeded {
                let embedded = tx
                    .prepare_cached(
                        "UPDATE nodes SET embedding_state = 'embedded' \
                         WHERE id = ?1 AND graph_id = ?2 AND content_version = ?3 \
                         AND embedding_state = 'pending'",
                    )
                    .map_err(db_err)?
                    .execute(params![ticket.node_id, graph.id, ticket.content_version])
                    .map_err(db_err)?;
                if embedded > 0 {
                    report.embedded += 1;
                    continue;
                }
                // superseded by a newer content version
                report.stale += tx
                    .prepare_cached(
                        "UPDATE nodes SET embedding_state = 'stale' \
                         WHERE id = ?1 AND graph_id = ?2 AND content_version <> ?3",
                    )
                    .map_err(db_err)?
                    .execute(params![ticket.node_id, graph.id, ticket.content_version])
                    .map_err(db_err)?;
            } else {
                report.stale += tx
                    .prepare_cached(
                        "UPDATE nodes SET embedding_state = 'stale' WHERE id = ?1 AND graph_id = ?2",
                    )
                    .map_err(db_err)?
                    .execute(params![ticket.node_id, graph.id])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(report)
    }

    /// Move nodes back to `pending` ahead of a re-embed, if their content
    /// version is unchanged. Returns the tickets that were claimed.
    pub fn claim_for_embedding(
        &self,
        owner: &OwnerKey,
        tickets: &[EmbeddingTicket],
    ) -> Result<Vec<EmbeddingTicket>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let graph = match Self::find_graph(&tx, owner)? {
            Some(graph) => graph,
            None => return Ok(Vec::new()),
        };

        let mut claimed = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let count = tx
                .prepare_cached(
                    "UPDATE nodes SET embedding_state = 'pending' \
                     WHERE id = ?1 AND graph_id = ?2 AND content_version = ?3",
                )
                .map_err(db_err)?
                .execute(params![ticket.node_id, graph.id, ticket.content_version])
                .map_err(db_err)?;
            if count > 0 {
                claimed.push(ticket.clone());
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(claimed)
    }

    /// Nodes that are `stale`, or `pending` since before `pending_before`.
    pub fn nodes_needing_embedding(
        &self,
        owner: &OwnerKey,
        pending_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let conn = self.conn.lock();
        let graph = match Self::find_graph(&conn, owner)? {
            Some(graph) => graph,
            None => return Ok(Vec::new()),
        };
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM nodes WHERE graph_id = ?1 \
                 AND (embedding_state = 'stale' OR (embedding_state = 'pending' AND updated_at < ?2)) \
                 ORDER BY updated_at ASC LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![graph.id, pending_before.timestamp_millis(), limit as i64],
                |row| Ok(Self::row_to_node(row)),
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Owners with at least one node that [`Self::nodes_needing_embedding`] would return.
    pub fn owners_needing_embedding(&self, pending_before: DateTime<Utc>) -> Result<Vec<OwnerKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT DISTINCT g.user_id, g.scope FROM graphs g JOIN nodes n ON n.graph_id = g.id \
                 WHERE n.embedding_state = 'stale' \
                    OR (n.embedding_state = 'pending' AND n.updated_at < ?1) \
                 ORDER BY g.id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pending_before.timestamp_millis()], |row| {
                Ok(OwnerKey {
                    user_id: row.get(0)?,
                    scope: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db_err)
        };
        let graphs = count("SELECT COUNT(*) FROM graphs")?;
        let nodes = count("SELECT COUNT(*) FROM nodes")?;
        let edges = count("SELECT COUNT(*) FROM edges")?;
        let stale_nodes = count("SELECT COUNT(*) FROM nodes WHERE embedding_state = 'stale'")?;
        let pending_nodes = count("SELECT COUNT(*) FROM nodes WHERE embedding_state = 'pending'")?;
        drop(conn);

        let db_size = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(StoreStats {
            graphs,
            nodes,
            edges,
            stale_nodes,
            pending_nodes,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_node(row: &rusqlite::Row<'_>) -> Node {
        let embedding_state = EmbeddingState::parse(
            &row.get::<_, String>("embedding_state").unwrap_or_default(),
        );
        Node {
            id: row.get("id").unwrap_or_default(),
            content: row.get("content").unwrap_or_default(),
            labels: parse_labels(row.get::<_, String>("labels_json").ok()),
            position: Position::from_parts(
                row.get::<_, Option<f64>>("x").ok().flatten(),
                row.get::<_, Option<f64>>("y").ok().flatten(),
            ),
            source_message_id: row
                .get::<_, Option<String>>("source_message_id")
                .ok()
                .flatten(),
            source_conversation_id: row
                .get::<_, Option<String>>("source_conversation_id")
                .ok()
                .flatten(),
            embedding_state,
            embedding_stale: embedding_state == EmbeddingState::Stale,
            content_version: row.get("content_version").unwrap_or(1),
            created_at: to_datetime(row.get("created_at").unwrap_or(0)),
            updated_at: to_datetime(row.get("updated_at").unwrap_or(0)),
        }
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> Edge {
        Edge {
            id: row.get("id").unwrap_or_default(),
            source: row.get("source_id").unwrap_or_default(),
            target: row.get("target_id").unwrap_or_default(),
            labels: parse_labels(row.get::<_, String>("labels_json").ok()),
            created_at: to_datetime(row.get("created_at").unwrap_or(0)),
            updated_at: to_datetime(row.get("updated_at").unwrap_or(0)),
        }
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_labels(json: Option<String>) -> Vec<String> {
    json.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn split_position(position: Option<Position>) -> (Option<f64>, Option<f64>) {
    match position {
        Some(p) => (Some(p.x), Some(p.y)),
        None => (None, None),
    }
}
