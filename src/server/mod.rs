//! HTTP adapter — a thin Axum layer over the arena core.
//!
//! Serves a JSON API for bankrolls, history, and wagers, plus an SSE
//! endpoint that starts a run and streams its round events. CORS enabled
//! for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, ArenaState, ShoeFactory};

/// Bind the port and serve in a background task.
pub async fn spawn_server(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind server port {port}"))?;

    info!(port, "API server listening on http://localhost:{port}");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/runs", post(routes::start_run))
        .route("/api/bankroll/:agent", get(routes::get_bankroll))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/api/rounds/:agent", get(routes::get_rounds))
        .route("/api/wagers/performance", post(routes::place_performance))
        .route("/api/wagers/head-to-head", post(routes::place_head_to_head))
        .route("/api/wagers/:id", get(routes::get_wager))
        .route("/api/odds/:agent/:period", get(routes::get_odds))
        .route("/api/head-to-head/odds/:a/:b", get(routes::get_pair_odds))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
