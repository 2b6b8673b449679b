//! Replay coordinator shared by variable refreshes and the query path

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::replay::{ReplayCache, ReplayHandle};
use crate::executor::QueryExecutor;
use crate::types::QueryRequest;

/// App tag stamped on every request the coordinator issues
pub const APP: &str = "VariableQuery";

/// Whether the next run issues a fresh query or replays the last one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub skip: bool,
}

impl CoordinatorState {
    /// Next run queries the backend
    pub fn fresh() -> Self {
        Self { skip: false }
    }

    /// Next run replays the cached result
    pub fn skip() -> Self {
        Self { skip: true }
    }
}

/// Counters for how runs were served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub fresh_runs: u64,
    pub replayed_runs: u64,
    pub empty_runs: u64,
}

/// Coordinates replayable query execution
///
/// A fresh run issues exactly one tagged request and caches its handle. A
/// skip run issues nothing and hands back the cached handle. Either way the
/// state falls back to fresh afterwards.
pub struct ReplayCoordinator {
    executor: Option<Arc<dyn QueryExecutor>>,
    state: CoordinatorState,
    cache: ReplayCache,
    stats: ReplayStats,
}

impl ReplayCoordinator {
    pub fn new(executor: Option<Arc<dyn QueryExecutor>>, state: CoordinatorState) -> Self {
        debug!(?state, has_executor = executor.is_some(), "ReplayCoordinator::new: called");
        Self {
            executor,
            state,
            cache: ReplayCache::Empty,
            stats: ReplayStats::default(),
        }
    }

    /// True when `request` should go straight to the executor
    ///
    /// That is the case with no active coordinator, and for requests the
    /// coordinator issued itself, which would otherwise loop back into it.
    pub fn is_bypassed(coordinator: Option<&ReplayCoordinator>, request: &QueryRequest) -> bool {
        let bypassed = coordinator.is_none() || request.app.as_deref() == Some(APP);
        debug!(app = ?request.app, bypassed, "ReplayCoordinator::is_bypassed: called");
        bypassed
    }

    /// Run or replay the query for `request`
    ///
    /// Returns `{ data: [] }` when there is nothing to replay and nothing to
    /// run. Resets the state to fresh.
    pub fn run(&mut self, request: &QueryRequest) -> ReplayHandle {
        debug!(request_id = %request.request_id, state = ?self.state, "ReplayCoordinator::run: called");
        let handle = self.replay_query(request);
        self.state = CoordinatorState::fresh();

        match handle {
            Some(handle) => handle,
            None => {
                debug!("ReplayCoordinator::run: nothing cached, returning empty result");
                self.stats.empty_runs += 1;
                ReplayHandle::empty()
            }
        }
    }

    fn replay_query(&mut self, request: &QueryRequest) -> Option<ReplayHandle> {
        if !self.state.skip
            && let Some(executor) = &self.executor
        {
            debug!("replay_query: issuing fresh query");
            let executor = Arc::clone(executor);
            let tagged = request.clone().with_app(APP);
            self.cache
                .replace(ReplayHandle::new(async move { executor.execute(tagged).await }));
            self.stats.fresh_runs += 1;
            return self.cache.current().cloned();
        }

        let cached = self.cache.current().cloned();
        if cached.is_some() {
            debug!("replay_query: replaying cached query");
            self.stats.replayed_runs += 1;
        }
        cached
    }

    /// Replace the state used by the next run
    pub fn update_state(&mut self, state: CoordinatorState) {
        debug!(?state, "ReplayCoordinator::update_state: called");
        self.state = state;
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn cache(&self) -> &ReplayCache {
        &self.cache
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }
}

/// Owner of the (at most one) active coordinator of an editor session
#[derive(Default)]
pub struct VariableSession {
    coordinator: Option<ReplayCoordinator>,
}

impl VariableSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create, update or tear down the session's coordinator
    ///
    /// `None` tears it down. Otherwise an existing coordinator keeps its
    /// executor and cache and only takes the new state; without one, a new
    /// coordinator bound to `executor` is created.
    pub fn set_variable_query(
        &mut self,
        executor: Arc<dyn QueryExecutor>,
        state: Option<CoordinatorState>,
    ) -> Option<&mut ReplayCoordinator> {
        debug!(?state, active = self.coordinator.is_some(), "set_variable_query: called");
        let Some(state) = state else {
            if let Some(coordinator) = self.coordinator.take() {
                let stats = coordinator.stats();
                info!(
                    fresh_runs = stats.fresh_runs,
                    replayed_runs = stats.replayed_runs,
                    empty_runs = stats.empty_runs,
                    "set_variable_query: coordinator torn down"
                );
            }
            return None;
        };

        let coordinator = self
            .coordinator
            .get_or_insert_with(|| ReplayCoordinator::new(Some(executor), state));
        coordinator.update_state(state);
        Some(coordinator)
    }

    pub fn is_bypassed(&self, request: &QueryRequest) -> bool {
        ReplayCoordinator::is_bypassed(self.coordinator.as_ref(), request)
    }

    pub fn is_active(&self) -> bool {
        self.coordinator.is_some()
    }

    pub fn coordinator(&self) -> Option<&ReplayCoordinator> {
        self.coordinator.as_ref()
    }

    pub fn coordinator_mut(&mut self) -> Option<&mut ReplayCoordinator> {
        self.coordinator.as_mut()
    }
}
