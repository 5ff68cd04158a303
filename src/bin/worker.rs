use metrics_exporter_prometheus::PrometheusBuilder;
use offload_queue::{
    config::QueueConfig, services::classifier::ClassifierBackend, shutdown, WorkerLoop,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting offload worker");

    // Load configuration
    let config = QueueConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: std::net::SocketAddr = addr.parse().expect("Invalid OFFLOAD_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }

    metrics::describe_counter!(
        "offload_jobs_completed_total",
        "Results published, by outcome"
    );
    metrics::describe_counter!(
        "offload_jobs_reclaimed_total",
        "Jobs returned to pending after their lease expired"
    );
    metrics::describe_counter!(
        "offload_jobs_quarantined_total",
        "Malformed job records moved to quarantine"
    );
    metrics::describe_histogram!(
        "offload_classification_seconds",
        "Time spent in the classification backend per job"
    );

    let classifier =
        ClassifierBackend::from_config(&config).expect("Failed to initialize classifier backend");
    tracing::info!(backend = %classifier.kind(), "Classifier backend ready");

    let worker = WorkerLoop::new(&config, classifier);
    worker
        .queue()
        .ensure_layout()
        .await
        .expect("Shared folder is not reachable");

    tracing::info!(worker_id = %worker.worker_id(), "Worker ready, starting job processing loop");

    let shutdown_token = shutdown::install_shutdown_handler();
    worker.run(shutdown_token).await;
}
