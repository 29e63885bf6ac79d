//! Prometheus metrics for the admission service.
//!
//! - Admission decisions by status, fail-open count, evaluation latency
//! - Counter store errors by operation
//! - Burst detections by type, classification failures, active state gauges
//! - Learning cycles by result and cycle duration
//! - Redis connectivity

mod helpers;

pub use helpers::{
    encode_metrics, AdmissionMetrics, BurstMetrics, CallbackMetrics, LearningMetrics,
    StoreMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_admission";

lazy_static! {
    // ============================================================================
    // Admission Metrics
    // ============================================================================

    /// Admission decisions by resulting status
    pub static ref DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_decisions_total", METRIC_PREFIX),
        "Total admission decisions",
        &["status"]
    ).unwrap();

    /// Requests allowed because evaluation failed internally
    pub static ref FAIL_OPEN_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fail_open_total", METRIC_PREFIX),
        "Requests allowed after an internal evaluation failure"
    ).unwrap();

    /// Time spent in a single evaluation
    pub static ref EVALUATION_LATENCY: Histogram = register_histogram!(
        format!("{}_evaluation_latency_seconds", METRIC_PREFIX),
        "Admission evaluation latency in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5]
    ).unwrap();

    /// Identifiers with their own rate limit configuration
    pub static ref CONFIGURED_IDENTIFIERS: IntGauge = register_int_gauge!(
        format!("{}_configured_identifiers", METRIC_PREFIX),
        "Identifiers with an identifier-specific configuration"
    ).unwrap();

    // ============================================================================
    // Counter Store Metrics
    // ============================================================================

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Counter store failures by operation",
        &["operation"]
    ).unwrap();

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    // ============================================================================
    // Burst Metrics
    // ============================================================================

    pub static ref BURSTS_DETECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_bursts_detected_total", METRIC_PREFIX),
        "Bursts detected by classification",
        &["burst_type"]
    ).unwrap();

    pub static ref CLASSIFICATION_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_classification_errors_total", METRIC_PREFIX),
        "Burst classifications that failed and were denied"
    ).unwrap();

    pub static ref BURSTS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_bursts_active", METRIC_PREFIX),
        "Identifiers currently holding an elevated burst limit"
    ).unwrap();

    pub static ref COOLDOWNS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_cooldowns_active", METRIC_PREFIX),
        "Identifiers currently in cooldown"
    ).unwrap();

    // ============================================================================
    // Learning Metrics
    // ============================================================================

    pub static ref LEARNING_CYCLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_learning_cycles_total", METRIC_PREFIX),
        "Usage learning cycles by result",
        &["result"]
    ).unwrap();

    pub static ref LEARNING_CYCLE_DURATION: Histogram = register_histogram!(
        format!("{}_learning_cycle_duration_seconds", METRIC_PREFIX),
        "Usage learning cycle duration in seconds",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    pub static ref CALLBACK_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_callback_errors_total", METRIC_PREFIX),
        "Registered callbacks that returned an error",
        &["callback"]
    ).unwrap();
}
