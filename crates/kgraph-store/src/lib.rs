//! kgraph store — per-owner graph documents on SQLite, plus a petgraph view
//! for structural queries.

pub mod graph;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use graph::GraphIndex;
pub use sqlite::SqliteGraphStore;
pub use types::*;
