//! Error types for document processing.

/// Failures inside a single document run.
///
/// Captured into the result's `error_message` and answered with HTTP 400.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document text cannot be empty")]
    EmptyInput,

    #[error("Document exceeds maximum length ({length} > {max} characters)")]
    InputTooLarge { length: usize, max: usize },

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Startup failures. Any of these keeps the service from serving.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Failed to load model: {0}")]
    Runtime(String),

    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("Failed to read label config from {path}: {reason}")]
    Labels { path: String, reason: String },
}
