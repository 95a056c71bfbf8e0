//! Prometheus metrics for rent-billing-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Invoices created by the generator.
pub static INVOICES_GENERATED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_invoices_generated_total",
        "Total number of rent invoices generated"
    )
    .expect("Failed to register invoices_generated_total")
});

/// Leases skipped by the generator, by reason.
pub static LEASES_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_leases_skipped_total",
        "Total number of leases skipped during invoice generation",
        &["reason"] // existing, failed
    )
    .expect("Failed to register leases_skipped_total")
});

/// Allocation records written.
pub static ALLOCATIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_allocations_total",
        "Total number of payment allocations written"
    )
    .expect("Failed to register allocations_total")
});

/// Sum of allocated amounts.
pub static ALLOCATED_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_allocated_amount_total",
        "Total amount allocated from payments to invoice lines"
    )
    .expect("Failed to register allocated_amount_total")
});

pub static INVOICES_VOIDED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "billing_invoices_voided_total",
        "Total number of invoices voided"
    )
    .expect("Failed to register invoices_voided_total")
});

/// Per-item failures that were skipped rather than aborting the operation.
pub static ITEM_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_item_failures_total",
        "Total number of per-item write failures by operation",
        &["operation"]
    )
    .expect("Failed to register item_failures_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Recorder for the HTTP request metrics emitted by the shared middleware.
static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the HTTP metrics recorder and forces registration of the billing metrics.
pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HTTP_METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "HTTP metrics recorder not installed"),
    }

    Lazy::force(&INVOICES_GENERATED_TOTAL);
    Lazy::force(&LEASES_SKIPPED_TOTAL);
    Lazy::force(&ALLOCATIONS_TOTAL);
    Lazy::force(&ALLOCATED_AMOUNT_TOTAL);
    Lazy::force(&INVOICES_VOIDED_TOTAL);
    Lazy::force(&ITEM_FAILURES_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format: HTTP metrics followed by billing metrics.
pub fn get_metrics() -> String {
    let mut output = HTTP_METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if let Ok(billing) = encoder.encode_to_string(&metric_families) {
        output.push_str(&billing);
    }

    output
}
