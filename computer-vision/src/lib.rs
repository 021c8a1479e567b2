//! Computer Vision service - classifies base64-encoded images with a
//! pretrained ONNX model and reports the top-K ImageNet classes.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod state;

/// Static service identity reported by `/health`.
pub const SERVICE_NAME: &str = "computer-vision";

/// Cloud Monitoring metric every classification is recorded under.
pub const METRIC_TYPE: &str = "custom.googleapis.com/vision_service/processing_time";
