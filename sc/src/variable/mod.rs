//! Variable-query coordination
//!
//! While a template variable's query is being edited, the variable refresh and
//! the generic query path must share one result instead of each hitting the
//! backend:
//! - **Fresh run:** issues one tagged query and caches it for replay
//! - **Skip run:** issues nothing and replays the cached query
//! - **Bypass:** requests with no active coordinator, or issued by it, go
//!   straight to the executor

mod coordinator;
mod replay;

pub use coordinator::{APP, CoordinatorState, ReplayCoordinator, ReplayStats, VariableSession};
pub use replay::{ReplayCache, ReplayHandle, ReplayResult};
