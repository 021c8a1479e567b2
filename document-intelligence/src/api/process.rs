//! Document processing endpoint.

use std::sync::Arc;

use ai_service_common::error::{ApiError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::processor::ProcessingResult;
use crate::state::AppState;

/// Build the process router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/process", post(process))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Entity labels to keep (e.g., `["PER", "ORG"]`). All labels when absent or empty.
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
}

/// POST /process - Extract named entities from a document.
///
/// 200 with the result on success, 400 with the result body when the
/// document was rejected or could not be processed.
async fn process(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProcessingResult>)> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let text = request.text.ok_or(ApiError::MissingField("text"))?;

    tracing::debug!(
        "Document request: {} bytes, entity_types={:?}",
        text.len(),
        request.entity_types
    );

    let result = state.processor.process(text, request.entity_types).await?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((status, Json(result)))
}
