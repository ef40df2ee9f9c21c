use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State of the metrics route, separate from the API state.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: JobQueue,
}

/// Prometheus scrape endpoint. Samples the queue depth before rendering.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("image_job_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to sample queue depth"),
    }
    state.handle.render()
}

/// Register descriptions for every metric the API and workers record.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "image_jobs_submitted_total",
        "Total transform jobs submitted"
    );
    metrics::describe_counter!(
        "image_jobs_completed_total",
        "Total transform jobs completed"
    );
    metrics::describe_counter!(
        "image_jobs_failed_total",
        "Total transform jobs that failed"
    );
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Time to run one image transformation"
    );
    metrics::describe_gauge!(
        "image_job_queue_depth",
        "Current number of pending jobs in the queue"
    );
}
