//! Health check endpoint.

use std::sync::Arc;

use ai_service_common::HealthResponse;
use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health.report())
}
