use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::services::queue::QueueDirectory;

/// Shared state passed to the status server's route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueDirectory>,
    pub metrics: Arc<PrometheusHandle>,
}

impl AppState {
    pub fn new(queue: QueueDirectory, metrics: PrometheusHandle) -> Self {
        Self {
            queue: Arc::new(queue),
            metrics: Arc::new(metrics),
        }
    }
}
