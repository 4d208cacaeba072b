//! HTTP mapping of cache and update failures

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use meganav_cache::{CacheError, SimulationError};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A read through the cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The source update could not be applied
    #[error(transparent)]
    Update(#[from] SimulationError),

    /// Invalidation or the follow-up forced refresh failed
    #[error("Error revalidating: {0}")]
    Revalidate(CacheError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let code = match self {
            ApiError::Cache(err) | ApiError::Revalidate(err) => err.to_http_status_code(),
            ApiError::Update(err) => err.to_http_status_code(),
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Cache(err) | ApiError::Revalidate(err) => match err {
                CacheError::NotFound { .. } => "NOT_FOUND",
                CacheError::SourceComputeFailure { .. } => "SOURCE_COMPUTE_FAILURE",
                CacheError::SourceTimeout { .. } => "SOURCE_TIMEOUT",
                CacheError::ConcurrentRefreshTimeout { .. } => "CONCURRENT_REFRESH_TIMEOUT",
                CacheError::ConfigError(_)
                | CacheError::SerializationError(_)
                | CacheError::Other(_) => "INTERNAL",
            },
            ApiError::Update(SimulationError::TargetNotFound(_)) => "UPDATE_TARGET_NOT_FOUND",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("Request failed with {}: {}", status, self);

        let body = match &self {
            ApiError::Revalidate(err) => json!({
                "message": "Error revalidating",
                "error": err.to_string(),
                "code": self.code(),
            }),
            _ => json!({
                "success": false,
                "error": self.code(),
                "message": self.to_string(),
                "timestamp": Utc::now(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
