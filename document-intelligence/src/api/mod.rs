//! HTTP API of the document-intelligence service.

pub mod health;
pub mod process;

use std::sync::Arc;

use ai_service_common::logging::request_logger;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(process::router())
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_logger))
        .with_state(state)
}
