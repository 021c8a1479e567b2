//! Shared application state.

use ai_service_common::HealthReporter;

use crate::processor::DocumentProcessor;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub processor: DocumentProcessor,
    pub health: HealthReporter,
}

impl AppState {
    pub fn new(processor: DocumentProcessor, health: HealthReporter) -> Self {
        Self { processor, health }
    }
}
