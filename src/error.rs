//! Cache error types

use redis::RedisError;
use std::time::Duration;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Remote read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Remote layer cannot be instantiated without a client")]
    MissingClient,
}

impl CacheError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CacheError::Configuration(message.into())
    }

    /// Whether this error came from talking to the backend, as opposed to a
    /// misconfiguration. Only backend errors are eligible for shallowing.
    pub fn is_backend(&self) -> bool {
        !matches!(
            self,
            CacheError::Configuration(_) | CacheError::MissingClient
        )
    }
}
