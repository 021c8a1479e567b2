//! Image classification processor.
//!
//! Owns the shared model handle and turns one base64 payload into a
//! [`ClassificationResult`], recording a metrics sample on every call.

use std::sync::Arc;
use std::time::Instant;

use ai_service_common::{round4, ApiError, MetricsEmitter};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::model::{ClassLabels, ImageModel};
use crate::preprocess;

/// Smallest `top_k` a request may ask for.
pub const MIN_TOP_K: i64 = 1;

/// Largest `top_k` a request may ask for.
pub const MAX_TOP_K: i64 = 10;

/// One ranked class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f64,
}

/// Response body of `POST /classify`.
///
/// A failed result always has no predictions; a successful one has no error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub success: bool,
    pub processing_time: f64,
    pub predictions: Vec<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ClassificationResult {
    fn succeeded(processing_time: f64, predictions: Vec<Prediction>) -> Self {
        Self {
            success: true,
            processing_time: round4(processing_time),
            predictions,
            error_message: None,
        }
    }

    fn failed(processing_time: f64, error: &ClassifyError) -> Self {
        Self {
            success: false,
            processing_time: round4(processing_time),
            predictions: Vec::new(),
            error_message: Some(error.to_string()),
        }
    }
}

/// Classifies images with a model loaded once at startup.
pub struct ImageClassifier {
    model: Arc<dyn ImageModel>,
    labels: Arc<ClassLabels>,
    metrics: MetricsEmitter,
}

impl ImageClassifier {
    pub fn new(model: Arc<dyn ImageModel>, labels: ClassLabels, metrics: MetricsEmitter) -> Self {
        Self {
            model,
            labels: Arc::new(labels),
            metrics,
        }
    }

    /// Classify a base64-encoded image and return its `top_k` most likely classes.
    ///
    /// Decode, format and inference failures come back as a failed result.
    /// `Err` is reserved for the unexpected: the inference task itself dying.
    /// `top_k` must already be validated to `MIN_TOP_K..=MAX_TOP_K`.
    pub async fn classify(
        &self,
        image_base64: String,
        top_k: usize,
    ) -> Result<ClassificationResult, ApiError> {
        let model = Arc::clone(&self.model);
        let labels = Arc::clone(&self.labels);
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let outcome = run_classification(model.as_ref(), &labels, &image_base64, top_k);
            (outcome, started.elapsed().as_secs_f64())
        })
        .await;

        let (outcome, processing_time) = match task {
            Ok(done) => done,
            Err(e) => {
                self.metrics
                    .record(started.elapsed().as_secs_f64(), false, &[])
                    .await;
                return Err(ApiError::Internal(format!("classification task failed: {}", e)));
            }
        };

        self.metrics
            .record(processing_time, outcome.is_ok(), &[])
            .await;

        match outcome {
            Ok(predictions) => {
                tracing::info!("Image classified: {:.3}s", processing_time);
                Ok(ClassificationResult::succeeded(processing_time, predictions))
            }
            Err(e) => {
                tracing::error!("Image classification failed: {}", e);
                Ok(ClassificationResult::failed(processing_time, &e))
            }
        }
    }
}

fn run_classification(
    model: &dyn ImageModel,
    labels: &ClassLabels,
    image_base64: &str,
    top_k: usize,
) -> Result<Vec<Prediction>, ClassifyError> {
    let bytes = preprocess::decode_base64(image_base64)?;
    let image = preprocess::decode_image(&bytes)?;
    let batch = preprocess::to_input_batch(&image)?;

    let logits = model.predict(batch)?;
    if logits.is_empty() {
        return Err(ClassifyError::Inference("model returned no scores".to_string()));
    }

    let probabilities = softmax(&logits);
    let predictions = top_k_indices(&probabilities, top_k)
        .into_iter()
        .map(|class_id| Prediction {
            class_id,
            class_name: labels.name(class_id).to_string(),
            confidence: round4(probabilities[class_id]),
        })
        .collect();

    Ok(predictions)
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest values, largest first. Ties keep index order.
pub fn top_k_indices(values: &[f64], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    indices.truncate(k);
    indices
}
