//! Replayable query results

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use tracing::debug;

use crate::error::QueryError;
use crate::types::QueryResponse;

/// Outcome delivered to every subscriber of a [`ReplayHandle`]
pub type ReplayResult = Result<QueryResponse, Arc<QueryError>>;

type ReplayFuture = Shared<BoxFuture<'static, ReplayResult>>;

/// A query result that runs once and replays to any number of subscribers
///
/// The wrapped execution starts when the first subscriber polls it. Its single
/// value, or its error, is kept and handed to every subscriber, including
/// those that subscribe after it resolved. Cloning the handle never re-runs
/// the query.
#[derive(Clone)]
pub struct ReplayHandle {
    inner: ReplayFuture,
}

impl ReplayHandle {
    /// Wrap an execution for replay
    pub fn new<F>(execution: F) -> Self
    where
        F: Future<Output = Result<QueryResponse, QueryError>> + Send + 'static,
    {
        debug!("ReplayHandle::new: called");
        Self {
            inner: execution.map(|result| result.map_err(Arc::new)).boxed().shared(),
        }
    }

    /// A handle already holding `response`
    pub fn ready(response: QueryResponse) -> Self {
        Self::new(future::ready(Ok(response)))
    }

    /// A handle holding `{ data: [] }`
    pub fn empty() -> Self {
        Self::ready(QueryResponse::empty())
    }

    /// Attach another subscriber
    pub fn subscribe(&self) -> impl Future<Output = ReplayResult> + Send + 'static {
        self.inner.clone()
    }

    /// The result, if the execution has already finished
    pub fn peek(&self) -> Option<&ReplayResult> {
        self.inner.peek()
    }

    /// True when both handles replay the same execution
    pub fn same_execution(&self, other: &ReplayHandle) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl IntoFuture for ReplayHandle {
    type Output = ReplayResult;
    type IntoFuture = ReplayFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

impl fmt::Debug for ReplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayHandle")
            .field("resolved", &self.peek().is_some())
            .finish()
    }
}

/// Single-slot cache of the most recent fresh execution
#[derive(Debug, Clone, Default)]
pub enum ReplayCache {
    /// Nothing has been executed yet
    #[default]
    Empty,
    /// The last fresh execution, in flight or finished
    Cached(ReplayHandle),
}

impl ReplayCache {
    pub fn current(&self) -> Option<&ReplayHandle> {
        match self {
            ReplayCache::Empty => None,
            ReplayCache::Cached(handle) => Some(handle),
        }
    }

    /// Overwrite the slot with a new execution
    pub fn replace(&mut self, handle: ReplayHandle) {
        *self = ReplayCache::Cached(handle);
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ReplayCache::Empty)
    }
}
