//! Shared application state.

use ai_service_common::HealthReporter;

use crate::classifier::ImageClassifier;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub classifier: ImageClassifier,
    pub health: HealthReporter,
    pub default_top_k: i64,
}

impl AppState {
    pub fn new(classifier: ImageClassifier, health: HealthReporter, default_top_k: i64) -> Self {
        Self {
            classifier,
            health,
            default_top_k,
        }
    }
}
