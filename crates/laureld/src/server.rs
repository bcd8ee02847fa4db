//! HTTP server for laureld

use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use laurel_common::RewardsEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Request bodies are small JSON documents
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<RewardsEngine>,
    pub start_time: Instant,
    /// Upper bound on one engine call
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(engine: RewardsEngine, request_timeout: Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            start_time: Instant::now(),
            request_timeout,
        }
    }
}

/// Full router with middleware, without binding a socket
pub fn app(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::achievement_routes())
        .merge(routes::points_routes())
        .merge(routes::leaderboard_routes())
        .merge(routes::referral_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C
pub async fn run(state: AppState, bind: &str) -> Result<()> {
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("[BOOT] Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gracefully");
        })
        .await
        .context("HTTP server error")?;
    Ok(())
}
