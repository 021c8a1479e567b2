//! Document Intelligence service - named-entity recognition behind a REST API.

use std::env;
use std::sync::Arc;

use ai_service_common::{logging, metrics, shutdown_signal, HealthReporter, MetricsEmitter};
use tokio::net::TcpListener;

use document_intelligence::config::Config;
use document_intelligence::model::{LabelMap, OnnxTokenClassifier};
use document_intelligence::processor::DocumentProcessor;
use document_intelligence::state::AppState;
use document_intelligence::{api, METRIC_TYPE, SERVICE_NAME};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    if env::args().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", SERVICE_NAME, VERSION);
        return Ok(());
    }

    let config = Config::load().map_err(|e| format!("Failed to load configuration: {}", e))?;

    logging::init(&config.logging);
    tracing::info!("Starting {} ({})", SERVICE_NAME, config.service.name);

    // A model that fails to load must keep the service from serving.
    let labels = match config.model.config_path.as_deref() {
        Some(path) => LabelMap::from_config_file(path)?,
        None => LabelMap::conll03(),
    };
    let model = OnnxTokenClassifier::load(
        &config.model.path,
        &config.model.tokenizer_path,
        labels,
        config.model.max_sequence_length,
    )
    .map_err(|e| {
        tracing::error!("Failed to initialize model: {}", e);
        e
    })?;

    let sink = metrics::sink_from_config(&config.metrics, &config.service);
    let processor = DocumentProcessor::new(
        Arc::new(model),
        MetricsEmitter::new(sink, METRIC_TYPE),
        config.model.max_text_chars,
    );

    let health = HealthReporter::new(SERVICE_NAME);
    tracing::info!(
        "Service initialized - GPU Available: {}",
        health.report().gpu_available
    );

    let state = Arc::new(AppState::new(processor, health));
    let app = api::router(state, config.api.body_limit_bytes);

    let addr = config.api.bind_addr();
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
