use axum::{Router, routing::get, routing::post};
use tower_http::decompression::RequestDecompressionLayer;

use super::{
    services::{active_imports, health, import_status, submit_import},
    state::AppState,
};

/// HTTP routes plus the WebSocket upgrade route of the gateway
pub fn router(state: AppState) -> Router {
    let gateway = state.gateway.clone();
    let ws_path = state.config.gateway.path.clone();

    Router::new()
        .route("/import", post(submit_import))
        .route("/import/active", get(active_imports))
        .route("/import/{job_id}", get(import_status))
        .route("/health", get(health))
        .with_state(state)
        // Automatically decompress gzip request bodies
        // Handles Content-Encoding header transparently at the middleware level
        .layer(RequestDecompressionLayer::new())
        .merge(gateway.router(&ws_path))
}
