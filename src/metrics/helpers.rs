//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BURSTS_ACTIVE, BURSTS_DETECTED_TOTAL, CALLBACK_ERRORS_TOTAL, CLASSIFICATION_ERRORS_TOTAL,
    COOLDOWNS_ACTIVE, DECISIONS_TOTAL, EVALUATION_LATENCY, FAIL_OPEN_TOTAL,
    LEARNING_CYCLES_TOTAL, LEARNING_CYCLE_DURATION, STORE_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record a decision by its status label
    pub fn record_decision(status: &str) {
        DECISIONS_TOTAL.with_label_values(&[status]).inc();
    }

    /// Record a blacklist rejection
    pub fn record_denied() {
        DECISIONS_TOTAL.with_label_values(&["denied"]).inc();
    }

    pub fn record_fail_open() {
        FAIL_OPEN_TOTAL.inc();
    }

    pub fn observe_latency(seconds: f64) {
        EVALUATION_LATENCY.observe(seconds);
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_error(operation: &str) {
        STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }
}

pub struct BurstMetrics;

impl BurstMetrics {
    pub fn record_detected(burst_type: &str) {
        BURSTS_DETECTED_TOTAL.with_label_values(&[burst_type]).inc();
    }

    pub fn record_classification_error() {
        CLASSIFICATION_ERRORS_TOTAL.inc();
    }

    /// Refresh the active burst and cooldown gauges
    pub fn set_active(bursts: usize, cooldowns: usize) {
        BURSTS_ACTIVE.set(bursts as i64);
        COOLDOWNS_ACTIVE.set(cooldowns as i64);
    }
}

pub struct LearningMetrics;

impl LearningMetrics {
    pub fn record_success(duration_secs: f64) {
        LEARNING_CYCLES_TOTAL.with_label_values(&["success"]).inc();
        LEARNING_CYCLE_DURATION.observe(duration_secs);
    }

    pub fn record_failure() {
        LEARNING_CYCLES_TOTAL.with_label_values(&["failure"]).inc();
    }

    pub fn record_skipped() {
        LEARNING_CYCLES_TOTAL.with_label_values(&["skipped"]).inc();
    }
}

pub struct CallbackMetrics;

impl CallbackMetrics {
    /// Record a callback failure; `kind` is learning, limit_exceeded, burst_detected or burst_ended
    pub fn record_error(kind: &str) {
        CALLBACK_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        AdmissionMetrics::record_decision("allowed");
        BurstMetrics::record_detected("LEGITIMATE");

        let output = encode_metrics().unwrap();
        assert!(output.contains("ara_admission_decisions_total"));
        assert!(output.contains("ara_admission_bursts_detected_total"));
    }
}
