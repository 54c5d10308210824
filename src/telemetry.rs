//! Telemetry module for Pieceflow
//!
//! Prometheus counters for flow operations, migrations and trigger
//! transitions. Structured logging lives in [`crate::init_logging`].

use crate::{PieceFlowError, Result};
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, TextEncoder, register_counter_vec,
    register_histogram_vec,
};

/// Flow operation counter
static FLOW_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pieceflow_flow_operations_total",
        "Total number of flow operations applied",
        &["operation", "status"]
    )
    .expect("Failed to register flow operations counter")
});

/// Flow operation duration histogram
static FLOW_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "pieceflow_flow_operation_duration_seconds",
            "Duration of flow operations in seconds"
        ),
        &["operation"]
    )
    .expect("Failed to register flow operation histogram")
});

/// Schema migration counter
static FLOW_MIGRATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pieceflow_flow_migrations_total",
        "Total number of flow versions read through the migration service",
        &["outcome"]
    )
    .expect("Failed to register flow migrations counter")
});

/// Trigger enable/disable counter
static TRIGGER_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pieceflow_trigger_transitions_total",
        "Total number of trigger enable and disable transitions",
        &["strategy", "transition", "status"]
    )
    .expect("Failed to register trigger transitions counter")
});

/// Recovery job counter
static REFILLED_JOBS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pieceflow_refilled_jobs_total",
        "Total number of jobs re-enqueued by recovery backfills",
        &["kind"]
    )
    .expect("Failed to register refilled jobs counter")
});

/// Record an applied flow operation
pub fn record_flow_operation(operation: &str, status: &str) {
    FLOW_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

/// Record how long a flow operation took
pub fn record_flow_operation_duration(operation: &str, duration_secs: f64) {
    FLOW_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record a migration read (`current`, `migrated` or `failed`)
pub fn record_migration(outcome: &str) {
    FLOW_MIGRATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a trigger transition
pub fn record_trigger_transition(strategy: &str, transition: &str, status: &str) {
    TRIGGER_TRANSITIONS_TOTAL
        .with_label_values(&[strategy, transition, status])
        .inc();
}

/// Record jobs re-enqueued by a recovery backfill
pub fn record_refilled_jobs(kind: &str, count: usize) {
    REFILLED_JOBS_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as f64);
}

/// Get Prometheus metrics in text format
pub fn get_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| PieceFlowError::config(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| PieceFlowError::config(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Times one flow operation and records its outcome
pub struct OperationTimer {
    operation: &'static str,
    start: std::time::Instant,
}

impl OperationTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: std::time::Instant::now(),
        }
    }

    pub fn finish<T>(self, result: &Result<T>) {
        let status = if result.is_ok() { "success" } else { "error" };
        record_flow_operation(self.operation, status);
        record_flow_operation_duration(self.operation, self.start.elapsed().as_secs_f64());
    }
}
