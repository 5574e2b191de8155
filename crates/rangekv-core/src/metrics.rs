//! Central metrics registry and metric definitions
//!
//! Metrics are registered lazily in the default Prometheus registry on first access.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

// ===== Queue Metrics =====

/// Number of ranges waiting in each maintenance queue
pub static QUEUE_PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "rangekv_queue_pending",
        "Ranges admitted but not yet processed",
        &["queue"]
    )
    .expect("Failed to register queue pending gauge")
});

/// Admission decisions by outcome (admitted, updated, rejected, in_flight)
pub static QUEUE_ADMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_queue_admissions_total",
        "Admission decisions taken by maintenance queues",
        &["queue", "outcome"]
    )
    .expect("Failed to register queue admissions counter")
});

/// Entries dropped because a queue was full
pub static QUEUE_EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_queue_evictions_total",
        "Lowest priority entries evicted from full queues",
        &["queue"]
    )
    .expect("Failed to register queue evictions counter")
});

/// Processing outcomes (success, partial, error)
pub static QUEUE_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_queue_processed_total",
        "Ranges processed by maintenance queues",
        &["queue", "outcome"]
    )
    .expect("Failed to register queue processed counter")
});

/// Processing latency histogram
pub static QUEUE_PROCESS_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rangekv_queue_process_duration_seconds",
        "Time spent processing one range",
        &["queue"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    )
    .expect("Failed to register queue process duration histogram")
});

// ===== Scan Metrics =====

/// Bytes reclaimed by scan-driven garbage collection
pub static SCAN_GC_BYTES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_scan_gc_bytes_total",
        "Bytes reclaimed by garbage collection during range scans",
        &["status"]
    )
    .expect("Failed to register scan GC bytes counter")
});

/// Intent resolutions attempted during scans by status (resolved, failed)
pub static SCAN_INTENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_scan_intents_total",
        "Write intents handled by range scans",
        &["status"]
    )
    .expect("Failed to register scan intents counter")
});

/// Checksum verification failures observed while scanning
pub static SCAN_CHECKSUM_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_scan_checksum_failures_total",
        "Checksum mismatches detected by range scans",
        &["queue"]
    )
    .expect("Failed to register scan checksum failures counter")
});

/// Statistics lookups that failed during scoring, by statistic
pub static SCAN_STAT_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rangekv_scan_stat_errors_total",
        "Range statistics lookups that failed while scoring",
        &["stat"]
    )
    .expect("Failed to register scan stat errors counter")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        QUEUE_ADMISSIONS.with_label_values(&["test", "admitted"]).inc();
        QUEUE_PENDING.with_label_values(&["test"]).set(3);
        assert_eq!(QUEUE_PENDING.with_label_values(&["test"]).get(), 3);
        assert!(QUEUE_ADMISSIONS
            .with_label_values(&["test", "admitted"])
            .get()
            >= 1);
    }
}
