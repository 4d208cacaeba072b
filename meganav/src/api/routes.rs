//! API routes for the navigation service

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use meganav_cache::{
    CacheKey, CacheRead, CacheStats, CacheValue, Clock, EntryState, NavigationSource,
    NavigationStore, ProductUpdateSimulator, ReadOutcome, RevalidationController, UpdateSimulator,
    NAVIGATION_KEY, NAVIGATION_TAG,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use crate::config::AppConfig;

/// Response header carrying the read outcome
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-status");

/// Application state
pub struct AppState {
    pub controller: Arc<RevalidationController>,
    pub simulator: Arc<dyn UpdateSimulator>,
    pub cache_control: HeaderValue,
}

impl AppState {
    /// Wire the demo navigation store, its source and the simulator
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(NavigationStore::demo());
        let source =
            NavigationSource::new(store.clone()).with_latency(config.source_latency());
        let controller = Arc::new(RevalidationController::new(
            config.cache_config(),
            Arc::new(source),
        )?);
        let simulator = Arc::new(ProductUpdateSimulator::new(store, controller.clone()));

        Self::new(controller, simulator)
    }

    pub fn new(
        controller: Arc<RevalidationController>,
        simulator: Arc<dyn UpdateSimulator>,
    ) -> anyhow::Result<Self> {
        let cache_control = HeaderValue::from_str(&controller.config().cache_control_header())?;
        Ok(Self {
            controller,
            simulator,
            cache_control,
        })
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Navigation read query parameters
#[derive(Debug, Default, Deserialize)]
pub struct NavigationQuery {
    /// Wait for a fresh value instead of accepting stale data
    pub fresh: Option<bool>,
}

/// Cache metadata attached to every navigation read
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub key: CacheKey,
    pub version: u64,
    pub state: EntryState,
    pub computed_at: DateTime<Utc>,
    pub degraded: bool,
    pub outcome: ReadOutcome,
}

#[derive(Debug, Serialize)]
pub struct NavigationResponse {
    pub data: CacheValue,
    pub cache: CacheInfo,
}

impl From<CacheRead> for NavigationResponse {
    fn from(read: CacheRead) -> Self {
        Self {
            data: read.value,
            cache: CacheInfo {
                key: read.key,
                version: read.version,
                state: read.state,
                computed_at: read.computed_at,
                degraded: read.degraded,
                outcome: read.outcome,
            },
        }
    }
}

/// Revalidation query parameters
#[derive(Debug, Default, Deserialize)]
pub struct RevalidateQuery {
    /// Recompute immediately after invalidating
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    /// Epoch milliseconds
    pub now: i64,
    pub invalidated: Vec<CacheKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub keys: Vec<CacheKey>,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Read the navigation document through the cache
pub async fn get_navigation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NavigationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut policy = state.controller.default_policy();
    if params.fresh.unwrap_or(false) {
        policy = policy.strict();
    }

    let read = state.controller.get(NAVIGATION_KEY, policy).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, state.cache_control.clone());
    let now = state.controller.store().clock().wall();
    if let Some(expires) = expires_at(now, state.controller.config().soft_ttl) {
        headers.insert(header::EXPIRES, expires);
    }
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(read.outcome.as_header_value()),
    );

    Ok((headers, Json(NavigationResponse::from(read))))
}

/// HTTP-date for `now + max_age`, matching the Cache-Control max-age
fn expires_at(now: DateTime<Utc>, max_age: std::time::Duration) -> Option<HeaderValue> {
    let max_age = chrono::Duration::from_std(max_age).ok()?;
    let expires = now.checked_add_signed(max_age)?;
    HeaderValue::from_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

/// Mutate the navigation source and invalidate the cached copy
pub async fn update_navigation(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state.simulator.simulate_update().await?;
    info!("{}", ack.message);
    Ok(Json(ack))
}

/// Invalidate the navigation tag, optionally recomputing right away
pub async fn revalidate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RevalidateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state.controller.invalidate(NAVIGATION_TAG).await;

    let version = if params.refresh.unwrap_or(false) {
        let read = state
            .controller
            .force_refresh(NAVIGATION_KEY)
            .await
            .map_err(ApiError::Revalidate)?;
        Some(read.version)
    } else {
        None
    };

    Ok(Json(RevalidateResponse {
        revalidated: true,
        now: Utc::now().timestamp_millis(),
        invalidated: event.keys,
        version,
    }))
}

/// Cache counters
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.controller.stats().await;
    let keys = state.controller.store().keys().await;

    Json(StatsResponse {
        hit_rate: stats.hit_rate(),
        stats,
        keys,
    })
}

/// JSON body for unsupported methods on API routes
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "message": "Method not allowed" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_expires_is_http_date_after_max_age() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        let expires = expires_at(now, Duration::from_secs(3600)).unwrap();
        assert_eq!(expires, "Mon, 19 Oct 2026 13:00:00 GMT");

        let immediate = expires_at(now, Duration::ZERO).unwrap();
        assert_eq!(immediate, "Mon, 19 Oct 2026 12:00:00 GMT");
    }
}
