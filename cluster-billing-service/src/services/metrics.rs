//! Metrics module for cluster-billing-service.
//!
//! Billing metrics live in the default `prometheus` registry; HTTP request
//! metrics from the shared middleware go through the `metrics` facade and its
//! Prometheus recorder. `/metrics` renders both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Counter, Encoder, HistogramVec, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;

/// Recorder handle for the `metrics` facade.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Billing runs by final status.
pub static BILLING_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("cluster_billing_runs_total", "Total billing runs by status"),
        &["status"]
    )
    .expect("Failed to register BILLING_RUNS_TOTAL")
});

/// Accrual outcomes: `charged` or `already_billed`.
pub static ACCRUALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("cluster_billing_accruals_total", "Total accruals by outcome"),
        &["outcome"]
    )
    .expect("Failed to register ACCRUALS_TOTAL")
});

/// Sum of charged amounts.
pub static BILLED_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "cluster_billing_amount_total",
        "Total amount charged to billing accounts"
    ))
    .expect("Failed to register BILLED_AMOUNT_TOTAL")
});

/// Units skipped in a run, by error kind.
pub static UNIT_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "cluster_billing_unit_failures_total",
            "Projects or namespaces skipped in billing runs by error kind"
        ),
        &["kind"]
    )
    .expect("Failed to register UNIT_FAILURES_TOTAL")
});

pub static UNRESOLVED_NAMESPACES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "cluster_billing_unresolved_namespaces_total",
        "Namespaces that could not be attributed to a project"
    ))
    .expect("Failed to register UNRESOLVED_NAMESPACES_TOTAL")
});

/// Remote call duration for fleet and cost-metrics APIs.
pub static UPSTREAM_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "cluster_billing_upstream_request_duration_seconds",
            "Fleet and cost-metrics API request duration",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["upstream", "operation"]
    )
    .expect("Failed to register UPSTREAM_REQUEST_DURATION")
});

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "cluster_billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Install the `metrics` recorder and register billing metrics.
/// Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
        }
    }

    Lazy::force(&BILLING_RUNS_TOTAL);
    Lazy::force(&ACCRUALS_TOTAL);
    Lazy::force(&BILLED_AMOUNT_TOTAL);
    Lazy::force(&UNIT_FAILURES_TOTAL);
    Lazy::force(&UNRESOLVED_NAMESPACES_TOTAL);
    Lazy::force(&UPSTREAM_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();
    if let Some(handle) = METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }
    output
}

pub fn record_billing_run(status: &str) {
    BILLING_RUNS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_accrual(outcome: &str, amount: f64) {
    ACCRUALS_TOTAL.with_label_values(&[outcome]).inc();
    if amount > 0.0 {
        BILLED_AMOUNT_TOTAL.inc_by(amount);
    }
}

pub fn record_unit_failure(kind: &str) {
    UNIT_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_unresolved_namespaces(count: usize) {
    UNRESOLVED_NAMESPACES_TOTAL.inc_by(count as u64);
}
