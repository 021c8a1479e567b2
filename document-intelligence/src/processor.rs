//! Document entity processor.
//!
//! Validates the text, runs the token classifier, aggregates and filters the
//! entities and scores the document. Every call records a metrics sample.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ai_service_common::{round4, ApiError, MetricsEmitter};
use serde::{Deserialize, Serialize};

use crate::entities::aggregate_simple;
use crate::error::DocumentError;
use crate::model::TokenClassifier;

/// One extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    /// Character offset of the span start.
    pub start: usize,
    /// Character offset one past the span end.
    pub end: usize,
    pub confidence: f64,
}

/// Response body of `POST /process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub processing_time: f64,
    pub entities: Vec<Entity>,
    /// Mean confidence of the returned entities, 0.0 when there are none.
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessingResult {
    fn succeeded(processing_time: f64, extraction: Extraction) -> Self {
        Self {
            success: true,
            processing_time: round4(processing_time),
            entities: extraction.entities,
            confidence_score: round4(extraction.confidence),
            error_message: None,
        }
    }

    fn failed(processing_time: f64, error: &DocumentError) -> Self {
        Self {
            success: false,
            processing_time: round4(processing_time),
            entities: Vec::new(),
            confidence_score: 0.0,
            error_message: Some(error.to_string()),
        }
    }
}

#[derive(Debug)]
struct Extraction {
    entities: Vec<Entity>,
    confidence: f64,
}

/// Extracts entities with a model loaded once at startup.
pub struct DocumentProcessor {
    model: Arc<dyn TokenClassifier>,
    metrics: MetricsEmitter,
    max_text_chars: usize,
}

impl DocumentProcessor {
    pub fn new(model: Arc<dyn TokenClassifier>, metrics: MetricsEmitter, max_text_chars: usize) -> Self {
        Self {
            model,
            metrics,
            max_text_chars,
        }
    }

    /// Extract entities from `text`, keeping only `entity_types` when given.
    ///
    /// An absent or empty `entity_types` keeps every entity. Validation and
    /// inference failures come back as a failed result; `Err` means the
    /// inference task itself died.
    pub async fn process(
        &self,
        text: String,
        entity_types: Option<Vec<String>>,
    ) -> Result<ProcessingResult, ApiError> {
        let model = Arc::clone(&self.model);
        let max_text_chars = self.max_text_chars;
        let filter: Option<HashSet<String>> = entity_types
            .filter(|types| !types.is_empty())
            .map(|types| types.into_iter().collect());
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let outcome = extract(model.as_ref(), &text, filter.as_ref(), max_text_chars);
            (outcome, started.elapsed().as_secs_f64())
        })
        .await;

        let (outcome, processing_time) = match task {
            Ok(done) => done,
            Err(e) => {
                self.metrics
                    .record(
                        started.elapsed().as_secs_f64(),
                        false,
                        &[("entity_count", "0".to_string())],
                    )
                    .await;
                return Err(ApiError::Internal(format!("document task failed: {}", e)));
            }
        };

        let entity_count = outcome.as_ref().map(|e| e.entities.len()).unwrap_or(0);
        self.metrics
            .record(
                processing_time,
                outcome.is_ok(),
                &[("entity_count", entity_count.to_string())],
            )
            .await;

        match outcome {
            Ok(extraction) => {
                tracing::info!(
                    "Document processed: {} entities, {:.3}s",
                    entity_count,
                    processing_time
                );
                Ok(ProcessingResult::succeeded(processing_time, extraction))
            }
            Err(e) => {
                tracing::error!("Document processing failed: {}", e);
                Ok(ProcessingResult::failed(processing_time, &e))
            }
        }
    }
}

fn extract(
    model: &dyn TokenClassifier,
    text: &str,
    filter: Option<&HashSet<String>>,
    max_text_chars: usize,
) -> Result<Extraction, DocumentError> {
    if text.trim().is_empty() {
        return Err(DocumentError::EmptyInput);
    }

    let length = text.chars().count();
    if length > max_text_chars {
        return Err(DocumentError::InputTooLarge {
            length,
            max: max_text_chars,
        });
    }

    let tokens = model.predict_tokens(text)?;

    // Byte position of every char boundary, so char offsets can slice the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut entities = Vec::new();
    let mut score_sum = 0.0;
    for span in aggregate_simple(&tokens) {
        if filter.is_some_and(|types| !types.contains(&span.label)) {
            continue;
        }
        if span.start >= span.end || span.end > length {
            return Err(DocumentError::Inference(format!(
                "entity offsets {}..{} outside document of {} characters",
                span.start, span.end, length
            )));
        }

        score_sum += span.score;
        entities.push(Entity {
            text: text[boundaries[span.start]..boundaries[span.end]].to_string(),
            label: span.label,
            start: span.start,
            end: span.end,
            confidence: round4(span.score),
        });
    }

    let confidence = if entities.is_empty() {
        0.0
    } else {
        score_sum / entities.len() as f64
    };

    Ok(Extraction {
        entities,
        confidence,
    })
}
