//! Prometheus metrics for membership-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "membership_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for workflow invocations by operation and outcome.
pub static WORKFLOW_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "membership_workflow_operations_total",
        "Total number of billing workflow invocations",
        &["operation", "status"]
    )
    .expect("Failed to register WORKFLOW_OPERATIONS")
});

/// Counter for workflow retries caused by invoice sequence contention.
pub static WORKFLOW_RETRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "membership_workflow_retries_total",
        "Total number of workflow retries",
        &["operation"]
    )
    .expect("Failed to register WORKFLOW_RETRIES")
});

/// Counter for issued invoices by payment kind.
pub static INVOICES_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "membership_invoices_issued_total",
        "Total number of invoices issued",
        &["payment_kind"]
    )
    .expect("Failed to register INVOICES_ISSUED")
});

/// Counter for post-commit collaborator calls by collaborator and outcome.
pub static COLLABORATOR_DISPATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "membership_collaborator_dispatches_total",
        "Total number of notification and device sync dispatches",
        &["collaborator", "status"]
    )
    .expect("Failed to register COLLABORATOR_DISPATCHES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "membership_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&WORKFLOW_OPERATIONS);
    Lazy::force(&WORKFLOW_RETRIES);
    Lazy::force(&INVOICES_ISSUED);
    Lazy::force(&COLLABORATOR_DISPATCHES);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a workflow outcome.
pub fn record_workflow(operation: &str, status: &str) {
    WORKFLOW_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a collaborator dispatch outcome.
pub fn record_dispatch(collaborator: &str, status: &str) {
    COLLABORATOR_DISPATCHES
        .with_label_values(&[collaborator, status])
        .inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
