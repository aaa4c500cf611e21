//! Prometheus metrics for pipeline observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a unified-job status transition.
pub fn job_status_changed(status: &str) {
    counter!("praetor_jobs_total", "status" => status.to_string()).increment(1);
}

/// Record an ExecutionRequest published to the bus.
pub fn request_published() {
    counter!("praetor_requests_published_total").increment(1);
}

/// Record a JobEvent published by an executor.
pub fn event_published(event_type: &str) {
    counter!("praetor_events_published_total", "type" => event_type.to_string()).increment(1);
}

/// Record a JobEvent projected into the store.
pub fn event_projected(event_type: &str) {
    counter!("praetor_events_projected_total", "type" => event_type.to_string()).increment(1);
}

/// Record events accepted by the ingestion surface.
pub fn events_ingested(count: usize) {
    counter!("praetor_events_ingested_total").increment(count as u64);
}

/// Record an execution workload launched in the substrate.
pub fn workload_launched() {
    counter!("praetor_workloads_launched_total").increment(1);
}

/// Record a run transitioned by the reconciler.
pub fn run_reconciled(state: &str) {
    counter!("praetor_runs_reconciled_total", "state" => state.to_string()).increment(1);
}

/// Record wall-clock duration of a playbook run.
pub fn run_duration(duration_ms: u64) {
    histogram!("praetor_run_duration_ms").record(duration_ms as f64);
}
