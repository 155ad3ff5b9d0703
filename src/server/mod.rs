//! axum HTTP server wiring: shared state, router, and startup.
pub mod error;
pub mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::index::THUMBS_DIR;
use crate::matcher::MatchEngine;

/// Shared application state available to all handlers.
pub struct AppState {
    pub engine: MatchEngine,
    pub config: Arc<Config>,
}

/// Build the application router.
///
/// Thumbnails referenced by match results are served statically under
/// `/actors/...` straight out of the data directory.
pub fn router(state: Arc<AppState>) -> Router {
    // The per-file cap is enforced in the handlers; the body limit only
    // has to admit a full batch of capped files
    let body_limit = state.config.max_upload_bytes.saturating_mul(10);
    let thumbs_dir = state.config.data_dir().join(THUMBS_DIR);

    Router::new()
        .route("/health", get(routes::health))
        .route("/match-actors", post(routes::match_actors))
        .route("/match-actors-batch", post(routes::match_actors_batch))
        .route("/admin/reload-index", post(routes::reload_index))
        .nest_service("/actors", ServeDir::new(thumbs_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
