//! Document Intelligence service - extracts named entities from text with a
//! pretrained token-classification model.

pub mod api;
pub mod config;
pub mod entities;
pub mod error;
pub mod model;
pub mod processor;
pub mod state;

/// Static service identity reported by `/health`.
pub const SERVICE_NAME: &str = "document-intelligence";

/// Cloud Monitoring metric every document is recorded under.
pub const METRIC_TYPE: &str = "custom.googleapis.com/ai_service/processing_time";

/// Longest accepted document, in characters.
pub const MAX_TEXT_CHARS: usize = 100_000;
