//! Image classification model seam and its ONNX Runtime implementation.

use std::path::Path;
use std::sync::Mutex;

use ai_service_common::lock_session;
use ndarray::Array4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::error::{ClassifyError, ModelLoadError};

/// Number of classes in the ImageNet-1k label space.
pub const IMAGENET_CLASSES: usize = 1000;

/// A loaded classifier.
///
/// Takes one preprocessed `[1, 3, H, W]` batch and returns the raw class
/// scores (logits) for that image. Implementations are shared read-only
/// across all requests.
pub trait ImageModel: Send + Sync {
    fn predict(&self, batch: Array4<f32>) -> Result<Vec<f32>, ClassifyError>;
}

/// Classifier backed by an ONNX Runtime session.
///
/// `Session::run` needs exclusive access, so calls are serialized on a mutex.
pub struct OnnxImageModel {
    session: Mutex<Session>,
    output_name: String,
}

impl OnnxImageModel {
    /// Load the model, registering the CUDA execution provider when the
    /// hardware is there (CPU otherwise).
    pub fn load(model_path: &str) -> Result<Self, ModelLoadError> {
        tracing::info!("Loading vision model from: {}", model_path);

        if !Path::new(model_path).exists() {
            return Err(ModelLoadError::NotFound(model_path.to_string()));
        }

        let session = Session::builder()
            .map_err(|e| ModelLoadError::Runtime(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelLoadError::Runtime(format!("optimization level: {}", e)))?
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| ModelLoadError::Runtime(format!("execution providers: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelLoadError::Runtime("model defines no outputs".to_string()))?;

        tracing::info!("Vision model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl ImageModel for OnnxImageModel {
    fn predict(&self, batch: Array4<f32>) -> Result<Vec<f32>, ClassifyError> {
        let input = Tensor::from_array(batch)
            .map_err(|e| ClassifyError::Inference(format!("tensor error: {}", e)))?;

        let mut session = lock_session(&self.session);

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| ClassifyError::Inference("model produced no output".to_string()))?;

        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("extract error: {}", e)))?;

        Ok(scores.to_vec())
    }
}

/// Class id to human-readable name mapping.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    /// Placeholder names `class_0 .. class_<count-1>`.
    pub fn synthetic(count: usize) -> Self {
        Self {
            names: (0..count).map(|i| format!("class_{}", i)).collect(),
        }
    }

    /// Read one label per line; the line number is the class id.
    pub fn from_file(path: &str) -> Result<Self, ModelLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Labels {
            path: path.to_string(),
            source,
        })?;

        let labels = Self::parse(&contents);
        tracing::info!("Loaded {} class labels from {}", labels.len(), path);
        Ok(labels)
    }

    fn parse(contents: &str) -> Self {
        Self {
            names: contents
                .lines()
                .map(|line| line.trim().to_string())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for `class_id`, or "unknown" when the id has no label.
    pub fn name(&self, class_id: usize) -> &str {
        self.names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_synthetic_labels() {
        let labels = ClassLabels::synthetic(IMAGENET_CLASSES);
        assert_eq!(labels.len(), 1000);
        assert_eq!(labels.name(0), "class_0");
        assert_eq!(labels.name(999), "class_999");
        assert_eq!(labels.name(1000), "unknown");
    }

    #[test]
    fn test_labels_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tench").unwrap();
        writeln!(file, "goldfish  ").unwrap();
        writeln!(file, "great white shark").unwrap();

        let labels = ClassLabels::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), "goldfish");
        assert_eq!(labels.name(2), "great white shark");
        assert_eq!(labels.name(3), "unknown");
    }

    #[test]
    fn test_labels_missing_file() {
        let err = ClassLabels::from_file("/nonexistent/labels.txt").unwrap_err();
        assert!(matches!(err, ModelLoadError::Labels { .. }));
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxImageModel::load("/nonexistent/resnet50.onnx").err().unwrap();
        assert!(matches!(err, ModelLoadError::NotFound(_)));
    }
}
