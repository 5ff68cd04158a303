use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use offload_queue::{app_state::AppState, config::QueueConfig, routes, shutdown, QueueDirectory};

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
    let config = QueueConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing offload queue status server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_gauge!(
        "offload_queue_depth",
        "Entries per queue location in the shared folder"
    );

    let queue = QueueDirectory::new(config.queue_root.clone());
    if let Err(e) = queue.health_check().await {
        // Keep serving: /health reports the mount as degraded until it appears.
        tracing::warn!(error = %e, "Shared folder not reachable at startup");
    }

    let state = AppState::new(queue, prometheus_handle);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job_status))
        .route("/metrics", get(routes::metrics::prometheus_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Starting offload queue status server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    let shutdown_token = shutdown::install_shutdown_handler();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await
        .expect("Server error");
}
