//! Computer Vision service - image classification behind a REST API.

use std::env;
use std::sync::Arc;

use ai_service_common::{logging, metrics, shutdown_signal, HealthReporter, MetricsEmitter};
use tokio::net::TcpListener;

use computer_vision::classifier::ImageClassifier;
use computer_vision::config::Config;
use computer_vision::model::{ClassLabels, OnnxImageModel, IMAGENET_CLASSES};
use computer_vision::state::AppState;
use computer_vision::{api, METRIC_TYPE, SERVICE_NAME};

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
    let model = OnnxImageModel::load(&config.model.path).map_err(|e| {
        tracing::error!("Failed to initialize vision model: {}", e);
        e
    })?;
    let labels = match config.model.labels_path.as_deref() {
        Some(path) => ClassLabels::from_file(path)?,
        None => ClassLabels::synthetic(IMAGENET_CLASSES),
    };

    let sink = metrics::sink_from_config(&config.metrics, &config.service);
    let classifier = ImageClassifier::new(
        Arc::new(model),
        labels,
        MetricsEmitter::new(sink, METRIC_TYPE),
    );

    let health = HealthReporter::new(SERVICE_NAME);
    tracing::info!(
        "Vision service initialized - GPU Available: {}",
        health.report().gpu_available
    );

    let state = Arc::new(AppState::new(classifier, health, config.model.default_top_k));
    let app = api::router(state, config.api.body_limit_bytes);

    let addr = config.api.bind_addr();
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
