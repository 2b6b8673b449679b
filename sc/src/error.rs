//! Query error types

use thiserror::Error;

/// Errors that can occur while executing a query against the backend
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueryError {
    /// Check if this error is retryable by the executor
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Api { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            QueryError::Network(_) => true,
            QueryError::InvalidResponse(_) => false,
            QueryError::Json(_) => false,
            QueryError::Config(_) => false,
        }
    }

    /// HTTP status if this came back from the backend
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
