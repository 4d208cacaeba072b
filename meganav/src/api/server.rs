//! API server for the navigation service

use anyhow::{Context, Result};
use axum::{
    middleware::from_fn,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;

use super::middleware::request_context;
use super::routes::{
    cache_stats, get_navigation, health_check, method_not_allowed, revalidate,
    update_navigation, AppState,
};

/// API server
pub struct ApiServer {
    config: AppConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a server backed by the demo navigation store
    pub fn new(config: AppConfig) -> Result<Self> {
        let state = AppState::from_config(&config)?;
        Ok(Self::with_state(config, Arc::new(state)))
    }

    /// Create a server around prepared state
    pub fn with_state(config: AppConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route(
                "/api/navigation",
                get(get_navigation)
                    .post(update_navigation)
                    .fallback(method_not_allowed),
            )
            .route(
                "/api/revalidate",
                get(revalidate).post(revalidate).fallback(method_not_allowed),
            )
            .route("/api/cache/stats", get(cache_stats).fallback(method_not_allowed))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .layer(from_fn(request_context)),
            )
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn start(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = self.router();
        info!(
            "Starting API server on {} (Cache-Control: {:?})",
            listener.local_addr()?,
            self.state.cache_control
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the task is dropped
        std::future::pending::<()>().await;
    }
}
