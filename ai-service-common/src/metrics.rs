//! Best-effort metrics emission.
//!
//! Every processor invocation records one processing-time sample. Emission is
//! awaited inline on the request path, but its failures never reach the
//! caller: [`MetricsError`] is private to this module's failure domain and the
//! emitter only logs it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{MetricsConfig, ServiceConfig};

/// Monitored resource type the samples are attached to.
const RESOURCE_TYPE: &str = "cloud_run_revision";

/// Refresh the access token this long before the metadata server says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// One labeled, timestamped sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub metric_type: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Monitoring request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Monitoring API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to obtain access token: {0}")]
    Token(String),
}

/// Destination for metric samples.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Short identifier used in log lines (e.g., "cloud_monitoring").
    fn name(&self) -> &'static str;

    /// Push a single sample.
    async fn write_point(&self, point: MetricPoint) -> Result<(), MetricsError>;
}

/// Sink that drops every sample. Used when metrics are disabled or no project is configured.
pub struct NoopSink;

#[async_trait]
impl MetricsSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn write_point(&self, point: MetricPoint) -> Result<(), MetricsError> {
        tracing::trace!(metric = %point.metric_type, value = point.value, "Metrics disabled, dropping sample");
        Ok(())
    }
}

// ============================================================================
// Cloud Monitoring
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimeSeriesRequest<'a> {
    time_series: Vec<TimeSeries<'a>>,
}

#[derive(Debug, Serialize)]
struct TimeSeries<'a> {
    metric: Metric<'a>,
    resource: Resource<'a>,
    points: Vec<Point>,
}

#[derive(Debug, Serialize)]
struct Metric<'a> {
    #[serde(rename = "type")]
    metric_type: &'a str,
    labels: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Resource<'a> {
    #[serde(rename = "type")]
    resource_type: &'static str,
    labels: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Serialize)]
struct Point {
    interval: Interval,
    value: TypedValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interval {
    end_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    double_value: f64,
}

/// Response from the metadata server token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Pushes samples to the Cloud Monitoring v3 `timeSeries.create` endpoint.
///
/// Authenticates with the instance service account via the metadata server.
pub struct CloudMonitoringSink {
    http_client: Client,
    endpoint: String,
    token_url: String,
    project_id: String,
    service_name: String,
    token: Mutex<Option<CachedToken>>,
}

impl CloudMonitoringSink {
    pub fn new(
        config: &MetricsConfig,
        project_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Result<Self, MetricsError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            project_id: project_id.into(),
            service_name: service_name.into(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, MetricsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http_client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| MetricsError::Token(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MetricsError::Token(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Token(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    fn request_body<'a>(&'a self, point: &'a MetricPoint) -> CreateTimeSeriesRequest<'a> {
        let mut resource_labels = BTreeMap::new();
        resource_labels.insert("project_id", self.project_id.as_str());
        resource_labels.insert("service_name", self.service_name.as_str());

        CreateTimeSeriesRequest {
            time_series: vec![TimeSeries {
                metric: Metric {
                    metric_type: &point.metric_type,
                    labels: &point.labels,
                },
                resource: Resource {
                    resource_type: RESOURCE_TYPE,
                    labels: resource_labels,
                },
                points: vec![Point {
                    interval: Interval {
                        end_time: point.end_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    },
                    value: TypedValue {
                        double_value: point.value,
                    },
                }],
            }],
        }
    }
}

#[async_trait]
impl MetricsSink for CloudMonitoringSink {
    fn name(&self) -> &'static str {
        "cloud_monitoring"
    }

    async fn write_point(&self, point: MetricPoint) -> Result<(), MetricsError> {
        let token = self.access_token().await?;
        let url = format!("{}/projects/{}/timeSeries", self.endpoint, self.project_id);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&self.request_body(&point))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Status { status, body });
        }

        Ok(())
    }
}

/// Pick the sink for the given configuration.
///
/// Falls back to [`NoopSink`] when metrics are disabled, no project id is
/// known, or the HTTP client cannot be built.
pub fn sink_from_config(metrics: &MetricsConfig, service: &ServiceConfig) -> Arc<dyn MetricsSink> {
    if !metrics.enabled {
        tracing::info!("Metrics emission disabled by configuration");
        return Arc::new(NoopSink);
    }

    let Some(project_id) = service.project_id.as_deref() else {
        tracing::warn!("No project id configured, metrics will not be recorded");
        return Arc::new(NoopSink);
    };

    match CloudMonitoringSink::new(metrics, project_id, service.name.as_str()) {
        Ok(sink) => {
            tracing::info!(
                "Recording metrics to Cloud Monitoring for project {}",
                project_id
            );
            Arc::new(sink)
        }
        Err(e) => {
            tracing::warn!("Failed to create monitoring client, metrics disabled: {}", e);
            Arc::new(NoopSink)
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

/// Fire-and-forget front end over a [`MetricsSink`].
#[derive(Clone)]
pub struct MetricsEmitter {
    sink: Arc<dyn MetricsSink>,
    metric_type: String,
}

impl MetricsEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>, metric_type: impl Into<String>) -> Self {
        Self {
            sink,
            metric_type: metric_type.into(),
        }
    }

    pub fn metric_type(&self) -> &str {
        &self.metric_type
    }

    /// Record one processing-time sample tagged with `success` and `extra_labels`.
    ///
    /// The write runs on its own task so that neither an error nor a panic in
    /// the sink can escape; both end up as a warning.
    pub async fn record(&self, processing_time: f64, success: bool, extra_labels: &[(&str, String)]) {
        let mut labels = BTreeMap::new();
        labels.insert("success".to_string(), success.to_string());
        for (key, value) in extra_labels {
            labels.insert((*key).to_string(), value.clone());
        }

        let point = MetricPoint {
            metric_type: self.metric_type.clone(),
            labels,
            value: processing_time,
            end_time: Utc::now(),
        };

        let sink = Arc::clone(&self.sink);
        let sink_name = sink.name();
        match tokio::spawn(async move { sink.write_point(point).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(sink = sink_name, "Failed to record metrics: {}", e),
            Err(e) => tracing::warn!(sink = sink_name, "Metrics task aborted: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecordingSink {
        points: StdMutex<Vec<MetricPoint>>,
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn write_point(&self, point: MetricPoint) -> Result<(), MetricsError> {
            self.points.lock().unwrap().push(point);
            Ok(())
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl MetricsSink for PanickingSink {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn write_point(&self, _point: MetricPoint) -> Result<(), MetricsError> {
            panic!("monitoring client blew up");
        }
    }

    fn test_config(server: &MockServer) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            endpoint: format!("{}/v3", server.uri()),
            token_url: format!("{}/token", server.uri()),
            timeout_secs: 2,
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn sample_point() -> MetricPoint {
        let mut labels = BTreeMap::new();
        labels.insert("success".to_string(), "true".to_string());
        MetricPoint {
            metric_type: "custom.googleapis.com/vision_service/processing_time".to_string(),
            labels,
            value: 0.25,
            end_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_emitter_adds_labels() {
        let sink = Arc::new(RecordingSink {
            points: StdMutex::new(Vec::new()),
        });
        let emitter = MetricsEmitter::new(sink.clone(), "custom.googleapis.com/ai_service/processing_time");

        emitter
            .record(0.5, true, &[("entity_count", "3".to_string())])
            .await;

        let points = sink.points.lock().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[0].labels["success"], "true");
        assert_eq!(points[0].labels["entity_count"], "3");
        assert_eq!(points[0].metric_type, "custom.googleapis.com/ai_service/processing_time");
    }

    #[tokio::test]
    async fn test_emitter_swallows_sink_panic() {
        let emitter = MetricsEmitter::new(Arc::new(PanickingSink), "custom.googleapis.com/test");
        emitter.record(0.1, false, &[]).await;
    }

    #[tokio::test]
    async fn test_cloud_monitoring_request_shape() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/v3/projects/test-project/timeSeries"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "timeSeries": [{
                    "metric": {
                        "type": "custom.googleapis.com/vision_service/processing_time",
                        "labels": { "success": "true" }
                    },
                    "resource": {
                        "type": "cloud_run_revision",
                        "labels": {
                            "project_id": "test-project",
                            "service_name": "computer-vision"
                        }
                    },
                    "points": [{ "value": { "doubleValue": 0.25 } }]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let sink = CloudMonitoringSink::new(&test_config(&server), "test-project", "computer-vision").unwrap();
        sink.write_point(sample_point()).await.unwrap();
        // Second write reuses the cached token.
        sink.write_point(sample_point()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cloud_monitoring_error_status() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/v3/projects/test-project/timeSeries"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let sink = CloudMonitoringSink::new(&test_config(&server), "test-project", "computer-vision").unwrap();
        let err = sink.write_point(sample_point()).await.unwrap_err();

        match err {
            MetricsError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cloud_monitoring_token_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let sink = CloudMonitoringSink::new(&test_config(&server), "test-project", "document-intelligence").unwrap();
        let err = sink.write_point(sample_point()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Token(_)));
    }

    #[test]
    fn test_sink_selection() {
        let metrics = MetricsConfig::default();
        let without_project = ServiceConfig {
            name: "computer-vision".to_string(),
            project_id: None,
        };
        assert_eq!(sink_from_config(&metrics, &without_project).name(), "noop");

        let disabled = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        let with_project = ServiceConfig {
            name: "computer-vision".to_string(),
            project_id: Some("test-project".to_string()),
        };
        assert_eq!(sink_from_config(&disabled, &with_project).name(), "noop");
        assert_eq!(sink_from_config(&metrics, &with_project).name(), "cloud_monitoring");
    }
}
