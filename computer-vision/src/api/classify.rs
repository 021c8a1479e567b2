//! Image classification endpoint.

use std::sync::Arc;

use ai_service_common::error::{ApiError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::classifier::{ClassificationResult, MAX_TOP_K, MIN_TOP_K};
use crate::state::AppState;

/// Build the classify router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/classify", post(classify))
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    /// Base64-encoded image bytes.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub top_k: Option<i64>,
}

/// POST /classify - Classify a base64-encoded image.
///
/// 200 with the result on success, 400 with the result body when the image
/// could not be classified.
async fn classify(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ClassificationResult>)> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let image = request.image.ok_or(ApiError::MissingField("image"))?;

    let top_k = request.top_k.unwrap_or(state.default_top_k);
    if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
        return Err(ApiError::InvalidRequest(format!(
            "top_k must be between {} and {}",
            MIN_TOP_K, MAX_TOP_K
        )));
    }

    tracing::debug!("Classification request, top_k={}", top_k);

    let result = state.classifier.classify(image, top_k as usize).await?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    Ok((status, Json(result)))
}
