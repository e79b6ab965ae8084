//! kgraph runtime — the mutation coordinator, recommendation dispatch and
//! embedding reconciliation.
//!
//! Every write to an owner's graph goes through [`GraphMutationCoordinator`],
//! which decides per [`kgraph_core::EmbeddingPolicy`] what happens when the
//! vector index cannot follow.

pub mod coordinator;
pub mod inflight;
pub mod input;
pub mod recommend;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::GraphMutationCoordinator;
pub use inflight::InFlight;
pub use input::*;
pub use recommend::{RecommendMethod, RecommendParams, RecommendRequest, Recommendations};
pub use types::*;
