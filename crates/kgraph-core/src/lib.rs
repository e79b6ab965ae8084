//! kgraph core — owner identity, configuration, error taxonomy.

pub mod config;
pub mod error;
pub mod owner;

pub use config::{
    DataPaths, EmbeddingPolicies, EmbeddingPolicy, GatewayConfig, KGraphConfig, ScopeMode,
};
pub use error::{Error, Result};
pub use owner::OwnerKey;
