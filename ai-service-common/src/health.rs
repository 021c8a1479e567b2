//! Health reporting and GPU detection.

use chrono::Utc;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub gpu_available: bool,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
}

/// Reports static service identity plus live accelerator availability.
///
/// Never touches the model, so it answers even while inference is stuck.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    service: String,
    gpu_probe: fn() -> bool,
}

impl HealthReporter {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_probe(service, cuda_available)
    }

    /// Use a custom GPU probe instead of asking the ONNX runtime.
    pub fn with_probe(service: impl Into<String>, gpu_probe: fn() -> bool) -> Self {
        Self {
            service: service.into(),
            gpu_probe,
        }
    }

    pub fn report(&self) -> HealthResponse {
        let now = Utc::now();
        HealthResponse {
            status: "healthy".to_string(),
            service: self.service.clone(),
            gpu_available: (self.gpu_probe)(),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Whether the CUDA execution provider can run in this process.
pub fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::debug!("CUDA availability check failed: {}", e);
            false
        }
    }
}
