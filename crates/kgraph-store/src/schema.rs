//! Database schema SQL.

/// Graph documents, their nodes and edges, and the import ledger.
///
/// `scope` is never NULL so the `(user_id, scope)` key stays unique for the
/// default graph too.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS graphs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (user_id, scope)
);

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    graph_id INTEGER NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    labels_json TEXT NOT NULL DEFAULT '[]',
    x REAL,
    y REAL,
    source_message_id TEXT,
    source_conversation_id TEXT,
    embedding_state TEXT NOT NULL DEFAULT 'pending',
    content_version INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_graph ON nodes(graph_id);
CREATE INDEX IF NOT EXISTS idx_nodes_state ON nodes(embedding_state);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    graph_id INTEGER NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
    source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    labels_json TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (graph_id, source_id, target_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

CREATE TABLE IF NOT EXISTS imported_sources (
    graph_id INTEGER NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
    source_id TEXT NOT NULL,
    node_count INTEGER NOT NULL,
    imported_at INTEGER NOT NULL,
    PRIMARY KEY (graph_id, source_id)
);
"#;

/// Tables the `check` command expects, with their required columns.
pub const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("graphs", &["id", "user_id", "scope", "created_at", "updated_at"]),
    (
        "nodes",
        &[
            "id",
            "graph_id",
            "content",
            "labels_json",
            "x",
            "y",
            "embedding_state",
            "content_version",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "edges",
        &["id", "graph_id", "source_id", "target_id", "labels_json"],
    ),
    ("imported_sources", &["graph_id", "source_id", "imported_at"]),
];
