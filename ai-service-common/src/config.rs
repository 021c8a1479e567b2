//! Configuration sections shared by both services.
//!
//! Each service owns its top-level `Config` struct and model section; the
//! sections here are flattened into it and loaded through [`builder`].

use std::env;

use config::builder::DefaultState;
use config::{Config as ConfigLoader, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body. Base64 images easily exceed axum's 2 MB default.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity used to tag metrics.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name (`K_SERVICE` on Cloud Run).
    pub name: String,
    /// Google Cloud project (`GOOGLE_CLOUD_PROJECT`). Metrics are disabled without it.
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Cloud Monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the Cloud Monitoring v3 REST API.
    #[serde(default = "default_monitoring_endpoint")]
    pub endpoint: String,
    /// Metadata server endpoint handing out the service account token.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_metrics_timeout")]
    pub timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_monitoring_endpoint(),
            token_url: default_token_url(),
            timeout_secs: default_metrics_timeout(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, picked up as structured logs by Cloud Logging.
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    32 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_monitoring_endpoint() -> String {
    "https://monitoring.googleapis.com/v3".to_string()
}
fn default_token_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}
fn default_metrics_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Start a configuration builder with the shared defaults and sources.
///
/// Configuration sources (in order of precedence):
/// 1. `PORT`, `GOOGLE_CLOUD_PROJECT` and `K_SERVICE`
/// 2. Environment variables (`<PREFIX>__SECTION__KEY` format)
/// 3. config.toml file (if present)
/// 4. Built-in defaults
///
/// Callers add their own `model.*` defaults before building.
pub fn builder(
    env_prefix: &str,
    default_service_name: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    ConfigLoader::builder()
        .set_default("api.host", default_host())?
        .set_default("api.port", default_port() as i64)?
        .set_default("api.body_limit_bytes", default_body_limit() as i64)?
        .set_default("service.name", default_service_name)?
        .set_default("metrics.enabled", true)?
        .set_default("metrics.endpoint", default_monitoring_endpoint())?
        .set_default("metrics.token_url", default_token_url())?
        .set_default("metrics.timeout_secs", default_metrics_timeout() as i64)?
        .set_default("logging.level", default_log_level())?
        .set_default("logging.format", "json")?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("api.port", env::var("PORT").ok())?
        .set_override_option("service.project_id", env::var("GOOGLE_CLOUD_PROJECT").ok())?
        .set_override_option("service.name", env::var("K_SERVICE").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sections {
        api: ApiConfig,
        service: ServiceConfig,
        metrics: MetricsConfig,
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_api_config() {
        let api = ApiConfig::default();
        assert_eq!(api.host, "0.0.0.0");
        assert_eq!(api.port, 8080);
        assert_eq!(api.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_builder_defaults() {
        let sections: Sections = builder("SHARED_TEST", "test-service")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        if env::var("K_SERVICE").is_err() {
            assert_eq!(sections.service.name, "test-service");
        }
        assert!(sections.metrics.enabled);
        assert_eq!(sections.metrics.timeout_secs, 5);
        assert_eq!(sections.logging.level, "info");
        assert_eq!(sections.logging.format, LogFormat::Json);
        assert_eq!(sections.api.body_limit_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn test_log_format_parsing() {
        let format: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(format, LogFormat::Text);
    }
}
