//! Prometheus metrics for the segment catalog.
//!
//! Registered in the default registry on first use.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    // ========== Poll Metrics ==========

    /// Poll cycles by outcome (published/empty/failed)
    pub static ref POLL_RUNS_TOTAL: CounterVec = register_counter_vec!(
        "segcat_poll_runs_total",
        "Total inventory poll cycles",
        &["outcome"]
    )
    .unwrap();

    /// Poll cycle latency distribution (seconds)
    pub static ref POLL_DURATION_SECONDS: Histogram = register_histogram!(
        "segcat_poll_duration_seconds",
        "Inventory poll latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Inventory Metrics ==========

    /// Datasources in the last published inventory
    pub static ref INVENTORY_DATA_SOURCES: Gauge = register_gauge!(
        "segcat_inventory_data_sources",
        "Datasources in the published inventory"
    )
    .unwrap();

    /// Segments in the last published inventory
    pub static ref INVENTORY_SEGMENTS: Gauge = register_gauge!(
        "segcat_inventory_segments",
        "Segments in the published inventory"
    )
    .unwrap();

    // ========== Administrative Metrics ==========

    /// Enable/remove operations by operation and status
    pub static ref ADMIN_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "segcat_admin_operations_total",
        "Total administrative catalog operations",
        &["operation", "status"]
    )
    .unwrap();
}

/// Records one administrative operation result.
pub(crate) fn record_admin<T, E>(operation: &str, result: &Result<T, E>) {
    let status = if result.is_ok() { "success" } else { "error" };
    ADMIN_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

/// Exports all metrics in Prometheus text format.
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
        });

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        String::from("# Error encoding metrics\n")
    })
}
