//! Query executors
//!
//! An executor is the one thing that actually sends a query somewhere. The
//! data source and the variable-query coordinator only decide *when* to call
//! it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

mod backend;

pub use backend::BackendClient;

use crate::config::BackendConfig;
use crate::error::QueryError;
use crate::types::{QueryRequest, QueryResponse};

/// Sends a query request and yields its response
///
/// Implementations must accept requests tagged by the variable-query
/// coordinator and treat them like any other request.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: QueryRequest) -> Result<QueryResponse, QueryError>;
}

/// Create the HTTP executor for the configured backend
pub fn create_executor(config: &BackendConfig) -> Result<Arc<dyn QueryExecutor>, QueryError> {
    debug!(base_url = %config.base_url, uid = %config.datasource_uid, "create_executor: called");
    Ok(Arc::new(BackendClient::from_config(config)?))
}
