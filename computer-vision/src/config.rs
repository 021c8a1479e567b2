//! Configuration for the computer-vision service.

use ai_service_common::config::{self as common, ApiConfig, LoggingConfig, MetricsConfig, ServiceConfig};
use config::ConfigError;
use serde::Deserialize;

use crate::classifier::{MAX_TOP_K, MIN_TOP_K};
use crate::SERVICE_NAME;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// ONNX export of the classifier (`[1, 3, 224, 224]` in, `[1, classes]` logits out).
    #[serde(default = "default_model_path")]
    pub path: String,
    /// Class names, one per line, line number = class id.
    /// Without it classes are named `class_<id>`.
    #[serde(default)]
    pub labels_path: Option<String>,
    /// `top_k` used when a request does not specify one.
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            labels_path: None,
            default_top_k: default_top_k(),
        }
    }
}

fn default_model_path() -> String {
    "models/resnet50.onnx".to_string()
}
fn default_top_k() -> i64 {
    5
}

impl Config {
    /// Load configuration from defaults, config.toml and the environment
    /// (`VISION__SECTION__KEY`, plus `PORT`, `GOOGLE_CLOUD_PROJECT`, `K_SERVICE`).
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = common::builder("VISION", SERVICE_NAME)?
            .set_default("model.path", default_model_path())?
            .set_default("model.default_top_k", default_top_k())?
            .build()?
            .try_deserialize()?;

        if !(MIN_TOP_K..=MAX_TOP_K).contains(&config.model.default_top_k) {
            return Err(ConfigError::Message(format!(
                "model.default_top_k must be between {} and {}",
                MIN_TOP_K, MAX_TOP_K
            )));
        }

        Ok(config)
    }
}
