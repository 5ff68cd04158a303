use axum::extract::State;
use axum::response::IntoResponse;

use crate::app_state::AppState;

/// Prometheus metrics scrape endpoint.
/// Refreshes the queue depth gauges, then renders the text exposition format.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.queue.depth().await {
        tracing::warn!(error = %e, "Failed to refresh queue depth");
    }
    state.metrics.render()
}
