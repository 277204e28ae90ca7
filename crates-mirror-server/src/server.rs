//! HTTP server setup and routing.
//!
//! Wires the sparse index, download, publish, and management endpoints
//! into an Axum router. Index serving and download resolution are plain
//! request handlers over the metadata store; synchronization and cache
//! promotion only ever run through the scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{api, config::Config, download, index, publish, state::AppState};

/// Build the application router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/api/v1/remotes", post(api::create_remote))
        .route("/api/v1/repositories", post(api::create_repository))
        .route("/api/v1/repositories/{name}", get(api::get_repository))
        .route(
            "/api/v1/repositories/{name}/sync",
            post(api::sync_repository),
        )
        .route(
            "/api/v1/repositories/{name}/add-cached",
            post(api::add_cached_content),
        )
        .route("/api/v1/distributions", post(api::create_distribution))
        .route("/api/v1/tasks/{id}", get(api::get_task))
        .route(
            "/cargo/{repo}/api/v1/crates/new",
            put(publish::publish_crate),
        )
        .route(
            "/cargo/{repo}/api/v1/crates/{crate}/{version}/download",
            get(download::download_crate),
        )
        .route(
            "/cargo/{repo}/api/v1/crates/{crate}/{version}/yank",
            axum::routing::delete(publish::yank_version),
        )
        .route(
            "/cargo/{repo}/api/v1/crates/{crate}/{version}/unyank",
            put(publish::unyank_version),
        )
        .route("/cargo/{repo}/{*path}", get(index::sparse_index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the mirror server and serve until shutdown.
pub async fn run_server(config: Config) -> Result<()> {
    info!("Starting crates mirror server");

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = Arc::new(AppState::new(config)?);
    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Invalid socket address");
        anyhow::anyhow!("Invalid socket address {host}:{port}: {e}")
    })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {host}:{port}: {e}")
    })?;

    println!("✅ Mirror server is running on http://{host}:{port}");
    println!("   Index root:  http://{host}:{port}/cargo/<distribution>/");
    println!("   Health:      http://{host}:{port}/health");

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {e}")
    })?;

    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn status_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "crates-mirror-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
