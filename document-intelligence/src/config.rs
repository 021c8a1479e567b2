//! Configuration for the document-intelligence service.

use ai_service_common::config::{self as common, ApiConfig, LoggingConfig, MetricsConfig, ServiceConfig};
use config::ConfigError;
use serde::Deserialize;

use crate::{MAX_TEXT_CHARS, SERVICE_NAME};

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
    /// ONNX export of the token classifier.
    #[serde(default = "default_model_path")]
    pub path: String,
    /// HuggingFace `tokenizer.json` matching the model.
    #[serde(default = "default_tokenizer_path")]
    pub tokenizer_path: String,
    /// HuggingFace `config.json` holding `id2label`. CoNLL-03 tags are assumed without it.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Model context length in tokens, including the CLS and SEP tokens.
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            tokenizer_path: default_tokenizer_path(),
            config_path: None,
            max_sequence_length: default_max_sequence_length(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_model_path() -> String {
    "models/bert-large-cased-finetuned-conll03-english/model.onnx".to_string()
}
fn default_tokenizer_path() -> String {
    "models/bert-large-cased-finetuned-conll03-english/tokenizer.json".to_string()
}
fn default_max_sequence_length() -> usize {
    512
}
fn default_max_text_chars() -> usize {
    MAX_TEXT_CHARS
}

impl Config {
    /// Load configuration from defaults, config.toml and the environment
    /// (`DOCUMENT__SECTION__KEY`, plus `PORT`, `GOOGLE_CLOUD_PROJECT`, `K_SERVICE`).
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = common::builder("DOCUMENT", SERVICE_NAME)?
            .set_default("model.path", default_model_path())?
            .set_default("model.tokenizer_path", default_tokenizer_path())?
            .set_default("model.max_sequence_length", default_max_sequence_length() as i64)?
            .set_default("model.max_text_chars", default_max_text_chars() as i64)?
            .build()?
            .try_deserialize()?;

        if config.model.max_sequence_length < 3 {
            return Err(ConfigError::Message(
                "model.max_sequence_length must leave room for at least one token".to_string(),
            ));
        }

        Ok(config)
    }
}
