use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use receipt_pipeline::app_state::AppState;
use receipt_pipeline::config::AppConfig;
use receipt_pipeline::routes;
use receipt_pipeline::services::queue::JobQueue;
use receipt_pipeline::services::worker;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing receipt-pipeline server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "receipt_pipeline_seconds",
        "Time to run one receipt through extraction and normalization"
    );
    metrics::describe_counter!(
        "receipt_jobs_submitted_total",
        "Total receipt jobs accepted"
    );
    metrics::describe_counter!(
        "receipt_jobs_completed_total",
        "Total receipt jobs completed"
    );
    metrics::describe_counter!(
        "receipt_jobs_failed_total",
        "Total receipt jobs that failed"
    );
    metrics::describe_counter!(
        "receipt_normalization_fallback_total",
        "Completed jobs whose receipt fell back to all-null fields"
    );
    metrics::describe_counter!(
        "receipt_callback_failures_total",
        "Callback deliveries that errored or got a non-2xx answer"
    );
    metrics::describe_gauge!(
        "receipt_queue_depth",
        "Current number of jobs waiting in the queue"
    );

    tracing::info!(
        mode = %config.pipeline_mode,
        llm_provider = %config.llm_provider,
        layoutlm_url = %config.layoutlm_url,
        donut_url = %config.donut_url,
        include_raw = config.include_raw,
        "Pipeline configuration loaded"
    );

    // Create shared application state
    let state = AppState::from_config(config).expect("Failed to initialize callback client");

    // Single worker: jobs run strictly one at a time
    let worker = worker::spawn(state.clone());

    let app = routes::router(state.clone(), prometheus_handle);

    let bind_addr = state.config.bind_addr.clone();
    tracing::info!("Starting receipt-pipeline on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.queue.clone()))
        .await
        .expect("Server error");

    // Let the worker finish what is already queued
    tracing::info!(queue_depth = state.queue.depth(), "Draining job queue");
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Worker task ended abnormally");
    }

    tracing::info!("Shutdown complete");
}

/// Resolves on Ctrl+C or SIGTERM, closing the queue first so in-flight
/// requests see the service as draining.
async fn shutdown_signal(queue: Arc<JobQueue>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, no longer accepting jobs");
    queue.close();
}
