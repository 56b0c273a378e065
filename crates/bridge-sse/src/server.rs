//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_sse, handle_write};
use axum::{routing::get, Router};
use bridge_core::config::HttpDefaults;
use bridge_core::Backend;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// The shared backend process.
    pub backend: Backend,
    /// Path clients POST requests to (also the SSE path).
    pub message_path: String,
}

/// Build the router: `<path>` for SSE (GET) and requests (POST), plus
/// `/health`. Other methods on `<path>` get `405`.
pub fn router(backend: Backend, path: &str) -> Router {
    let state = Arc::new(AppState {
        backend,
        message_path: path.to_string(),
    });

    // Browser-hosted MCP clients connect cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(path, get(handle_sse).post(handle_write))
        .route(HttpDefaults::HEALTH_PATH, get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP/SSE server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    backend: Backend,
    host: &str,
    port: u16,
    path: &str,
) -> anyhow::Result<SocketAddr> {
    let path = normalize_path(path);
    anyhow::ensure!(
        path != HttpDefaults::HEALTH_PATH,
        "{} is reserved for the health check",
        HttpDefaults::HEALTH_PATH
    );
    let app = router(backend, &path);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

/// Ensure the path has a single leading slash.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        HttpDefaults::SSE_PATH.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
