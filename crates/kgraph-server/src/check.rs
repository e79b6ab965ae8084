//! Offline integrity check of a data directory.
//!
//! Opens the graph database read-only and reports schema problems, row
//! counts, and rows that violate the graph invariants (edges whose endpoints
//! are missing or live in another graph, duplicate pairs, unparseable labels).

use std::path::Path;

use kgraph_store::schema::REQUIRED_COLUMNS;
use rusqlite::{Connection, OpenFlags};

/// Result of a `check` run.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub db_valid: bool,
    pub graphs: i64,
    pub nodes: i64,
    pub edges: i64,
    pub stale_nodes: i64,
    pub pending_nodes: i64,
    pub imported_sources: i64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CheckReport {
    pub fn is_healthy(&self) -> bool {
        self.db_valid && self.errors.is_empty()
    }
}

/// Validate that a data directory contains a consistent kgraph database.
pub fn check(data_dir: &Path) -> CheckReport {
    let mut report = CheckReport::default();

    let db_path = data_dir.join("graphdb/kgraph.db");
    if !db_path.exists() {
        report
            .errors
            .push(format!("Database not found: {}", db_path.display()));
        return report;
    }

    let conn = match Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(c) => c,
        Err(e) => {
            report.errors.push(format!("Failed to open database: {}", e));
            return report;
        }
    };

    for (table, columns) in REQUIRED_COLUMNS {
        match table_exists(&conn, table) {
            Ok(true) => {}
            Ok(false) => {
                report.errors.push(format!("Missing required table: {}", table));
                continue;
            }
            Err(e) => {
                report.errors.push(format!("Error checking table {}: {}", table, e));
                continue;
            }
        }
        let present = get_column_names(&conn, table);
        for column in columns.iter() {
            if !present.iter().any(|c| c == *column) {
                report
                    .errors
                    .push(format!("{} table missing column: {}", table, column));
            }
        }
    }

    if !report.errors.is_empty() {
        return report;
    }

    report.db_valid = true;

    report.graphs = count_rows(&conn, "graphs").unwrap_or(0);
    report.nodes = count_rows(&conn, "nodes").unwrap_or(0);
    report.edges = count_rows(&conn, "edges").unwrap_or(0);
    report.imported_sources = count_rows(&conn, "imported_sources").unwrap_or(0);
    report.stale_nodes = count_where(&conn, "nodes", "embedding_state = 'stale'").unwrap_or(0);
    report.pending_nodes = count_where(&conn, "nodes", "embedding_state = 'pending'").unwrap_or(0);

    let problems: [(&str, &str); 4] = [
        (
            "edge(s) reference a missing node",
            "SELECT COUNT(*) FROM edges e
             WHERE NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = e.source_id)
                OR NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = e.target_id)",
        ),
        (
            "edge(s) connect nodes of another graph",
            "SELECT COUNT(*) FROM edges e
             JOIN nodes s ON s.id = e.source_id
             JOIN nodes t ON t.id = e.target_id
             WHERE s.graph_id != e.graph_id OR t.graph_id != e.graph_id",
        ),
        (
            "node(s) belong to a missing graph",
            "SELECT COUNT(*) FROM nodes n
             WHERE NOT EXISTS (SELECT 1 FROM graphs g WHERE g.id = n.graph_id)",
        ),
        (
            "node(s) have empty content",
            "SELECT COUNT(*) FROM nodes WHERE trim(content) = ''",
        ),
    ];
    for (what, sql) in problems {
        match conn.query_row(sql, [], |row| row.get::<_, i64>(0)) {
            Ok(0) => {}
            Ok(n) => report.errors.push(format!("{} {}", n, what)),
            Err(e) => report.warnings.push(format!("Could not check '{}': {}", what, e)),
        }
    }

    if let Ok(bad) = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM nodes WHERE json_valid(labels_json) = 0)
          + (SELECT COUNT(*) FROM edges WHERE json_valid(labels_json) = 0)",
        [],
        |row| row.get::<_, i64>(0),
    ) {
        if bad > 0 {
            report.errors.push(format!("{} row(s) with unparseable labels", bad));
        }
    }

    if report.stale_nodes > 0 {
        report.warnings.push(format!(
            "{} node(s) await re-embedding; the reconciler picks them up while the server runs",
            report.stale_nodes
        ));
    }

    report
}

/// Print a check report to stdout.
pub fn print_report(report: &CheckReport) {
    println!("=== kgraph Check Report ===");
    println!();
    println!("Database valid:     {}", if report.db_valid { "YES" } else { "NO" });
    println!("Graphs:             {}", report.graphs);
    println!("Nodes:              {}", report.nodes);
    println!("Edges:              {}", report.edges);
    println!("Stale nodes:        {}", report.stale_nodes);
    println!("Pending nodes:      {}", report.pending_nodes);
    println!("Imported sources:   {}", report.imported_sources);

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &report.warnings {
            println!("  - {}", w);
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }

    println!();
    if report.is_healthy() {
        println!("Status: CONSISTENT");
    } else {
        println!("Status: CHECK FAILED");
    }
}

// Internal helpers

fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn get_column_names(conn: &Connection, table: &str) -> Vec<String> {
    // table names come from REQUIRED_COLUMNS, never from input
    let query = format!("PRAGMA table_info({})", table);
    let mut names = Vec::new();
    if let Ok(mut stmt) = conn.prepare(&query) {
        if let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) {
            names.extend(rows.flatten());
        }
    }
    names
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    conn.query_row(&query, [], |row| row.get(0))
}

fn count_where(conn: &Connection, table: &str, filter: &str) -> Result<i64, rusqlite::Error> {
    let query = format!("SELECT COUNT(*) FROM {} WHERE {}", table, filter);
    conn.query_row(&query, [], |row| row.get(0))
}
