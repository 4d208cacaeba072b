//! Error types for cache operations
//!
//! This module defines the error types surfaced by the revalidating cache and
//! the errors a [`DataSource`](crate::source::DataSource) may report.

use thiserror::Error;

/// Main error type for cache operations
///
/// Errors are `Clone` because a single refresh outcome is delivered to every
/// caller waiting on the same in-flight recomputation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The data source failed while recomputing a key
    #[error("Source compute failure for '{key}': {reason}")]
    SourceComputeFailure { key: String, reason: String },

    /// The data source did not answer within the compute timeout
    #[error("Source compute for '{key}' timed out after {timeout_ms}ms")]
    SourceTimeout { key: String, timeout_ms: u64 },

    /// The key was never populated and the compute also failed
    #[error("No value available for '{key}': {reason}")]
    NotFound { key: String, reason: String },

    /// A waiter gave up on an in-flight refresh owned by another caller
    #[error("Timed out after {timeout_ms}ms waiting for in-flight refresh of '{key}'")]
    ConcurrentRefreshTimeout { key: String, timeout_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Key the error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::SourceComputeFailure { key, .. }
            | CacheError::SourceTimeout { key, .. }
            | CacheError::NotFound { key, .. }
            | CacheError::ConcurrentRefreshTimeout { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether the error came from a failed or timed-out recomputation
    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            CacheError::SourceComputeFailure { .. } | CacheError::SourceTimeout { .. }
        )
    }

    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            CacheError::NotFound { .. } => 404,
            CacheError::SourceComputeFailure { .. } => 502,
            CacheError::ConcurrentRefreshTimeout { .. } => 503,
            CacheError::SourceTimeout { .. } => 504,
            CacheError::ConfigError(_)
            | CacheError::SerializationError(_)
            | CacheError::Other(_) => 500,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

/// Error reported by a data source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source does not know how to derive this key
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// The backing data could not be reached or produced
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The produced data could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Serialization(e.to_string())
    }
}
