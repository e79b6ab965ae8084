//! kgraph server — HTTP surface, background reconciler and the `check` command.

pub mod check;
pub mod error;
pub mod extract;
pub mod owner;
pub mod routes;
pub mod state;
pub mod worker;

pub use routes::build_router;
pub use state::AppState;
