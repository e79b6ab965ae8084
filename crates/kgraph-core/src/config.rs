//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 3080;
const DEFAULT_VECTOR_URL: &str = "http://localhost:8000";

/// Paths to all kgraph data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Graph database directory (`data/graphdb/`).
    pub graphdb: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            graphdb: root.join("graphdb"),
            root,
        };
        std::fs::create_dir_all(&paths.graphdb)?;
        Ok(paths)
    }
}

/// How graph documents are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeMode {
    /// One graph per user.
    PerUser,
    /// One graph per (user, conversation).
    PerConversation,
}

impl std::str::FromStr for ScopeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "per-user" => Ok(Self::PerUser),
            "conversation" | "per-conversation" => Ok(Self::PerConversation),
            other => Err(Error::Config(format!("unknown scope mode '{}'", other))),
        }
    }
}

/// What happens to a graph mutation when its embedding step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingPolicy {
    /// Compensate the graph mutation and fail the operation.
    Strict,
    /// Keep the mutation and flag the node stale.
    BestEffort,
}

impl std::str::FromStr for EmbeddingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            other => Err(Error::Config(format!("unknown embedding policy '{}'", other))),
        }
    }
}

impl std::fmt::Display for EmbeddingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Embedding policy per mutation kind. Deletes are always best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingPolicies {
    pub create: EmbeddingPolicy,
    pub update: EmbeddingPolicy,
    pub import: EmbeddingPolicy,
    pub merge: EmbeddingPolicy,
}

impl Default for EmbeddingPolicies {
    fn default() -> Self {
        Self {
            create: EmbeddingPolicy::Strict,
            update: EmbeddingPolicy::BestEffort,
            import: EmbeddingPolicy::Strict,
            merge: EmbeddingPolicy::Strict,
        }
    }
}

impl EmbeddingPolicies {
    /// Same policy for every mutation kind.
    pub fn uniform(policy: EmbeddingPolicy) -> Self {
        Self {
            create: policy,
            update: policy,
            import: policy,
            merge: policy,
        }
    }
}

/// Endpoints and retry budget of the external vector services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub embedding_url: String,
    pub layout_url: String,
    pub recommend_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards.
    pub backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            embedding_url: DEFAULT_VECTOR_URL.into(),
            layout_url: DEFAULT_VECTOR_URL.into(),
            recommend_url: DEFAULT_VECTOR_URL.into(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Top-level kgraph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KGraphConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub gateway: GatewayConfig,
    pub scope_mode: ScopeMode,
    pub allow_self_loops: bool,
    pub policies: EmbeddingPolicies,
    /// How often the background reconciler sweeps stale nodes.
    pub reconcile_interval: Duration,
    /// Pending nodes older than this are considered abandoned and re-embedded.
    pub pending_grace: Duration,
}

impl KGraphConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(data_dir: impl AsRef<Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let vector_url = lookup("KGRAPH_VECTOR_URL").unwrap_or_else(|| DEFAULT_VECTOR_URL.into());
        let gateway = GatewayConfig {
            embedding_url: lookup("KGRAPH_EMBEDDING_URL").unwrap_or_else(|| vector_url.clone()),
            layout_url: lookup("KGRAPH_LAYOUT_URL").unwrap_or_else(|| vector_url.clone()),
            recommend_url: lookup("KGRAPH_RECOMMEND_URL").unwrap_or_else(|| vector_url.clone()),
            timeout: Duration::from_secs(parse_or(&lookup, "KGRAPH_GATEWAY_TIMEOUT_SECS", 10u64)?),
            max_attempts: parse_or(&lookup, "KGRAPH_GATEWAY_ATTEMPTS", 3u32)?.max(1),
            backoff: Duration::from_millis(parse_or(&lookup, "KGRAPH_GATEWAY_BACKOFF_MS", 200u64)?),
        };

        let defaults = EmbeddingPolicies::default();
        let policies = EmbeddingPolicies {
            create: parse_or(&lookup, "KGRAPH_POLICY_CREATE", defaults.create)?,
            update: parse_or(&lookup, "KGRAPH_POLICY_UPDATE", defaults.update)?,
            import: parse_or(&lookup, "KGRAPH_POLICY_IMPORT", defaults.import)?,
            merge: parse_or(&lookup, "KGRAPH_POLICY_MERGE", defaults.merge)?,
        };

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            gateway,
            scope_mode: parse_or(&lookup, "KGRAPH_SCOPE_MODE", ScopeMode::PerUser)?,
            allow_self_loops: parse_or(&lookup, "KGRAPH_ALLOW_SELF_LOOPS", false)?,
            policies,
            reconcile_interval: Duration::from_secs(parse_or(
                &lookup,
                "KGRAPH_RECONCILE_INTERVAL_SECS",
                60u64,
            )?),
            pending_grace: Duration::from_secs(parse_or(&lookup, "KGRAPH_PENDING_GRACE_SECS", 120u64)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={}: {}", key, raw, e))),
        _ => Ok(default),
    }
}
