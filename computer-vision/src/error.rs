//! Error types for image classification.

/// Failures inside a single classification.
///
/// These never escape the classifier; they are captured into the result's
/// `error_message` and answered with HTTP 400.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Cannot decode image: {0}")]
    ImageFormat(#[from] image::ImageError),

    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Unsupported image dimensions {width}x{height}: aspect ratio exceeds {max_ratio}:1")]
    Dimensions {
        width: u32,
        height: u32,
        max_ratio: u32,
    },

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

    #[error("Failed to read labels from {path}: {source}")]
    Labels {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
