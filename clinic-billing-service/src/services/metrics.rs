//! Prometheus metrics for clinic-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Allocation attempts by outcome.
pub static ALLOCATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "clinic_billing_allocations_total",
        "Total number of payment allocations by outcome",
        &["status"] // committed, rejected, failed
    )
    .expect("Failed to register allocations_total")
});

/// Receipts issued, by payment mode.
pub static RECEIPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "clinic_billing_receipts_total",
        "Total number of receipts issued by payment mode",
        &["mode"]
    )
    .expect("Failed to register receipts_total")
});

/// Money collected through allocations.
pub static COLLECTED_AMOUNT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "clinic_billing_collected_amount_total",
        "Total amount collected through allocations"
    )
    .expect("Failed to register collected_amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "clinic_billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Chains found short of their collection floor.
pub static SHORTFALL_WARNINGS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "clinic_billing_shortfall_warnings_total",
        "Treatment chains reported below the doctor-fee-plus-lab floor"
    )
    .expect("Failed to register shortfall_warnings_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "clinic_billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&ALLOCATIONS_TOTAL);
    Lazy::force(&RECEIPTS_TOTAL);
    Lazy::force(&COLLECTED_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&SHORTFALL_WARNINGS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_allocation(status: &str) {
    ALLOCATIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_receipts(mode: &str, count: usize) {
    RECEIPTS_TOTAL
        .with_label_values(&[mode])
        .inc_by(count as f64);
}

pub fn record_collected(amount: Decimal) {
    COLLECTED_AMOUNT_TOTAL.inc_by(amount.to_f64().unwrap_or_default());
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

pub fn record_shortfall_warning() {
    SHORTFALL_WARNINGS_TOTAL.inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
