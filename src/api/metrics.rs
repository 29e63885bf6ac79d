//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are sampled rather than event driven
fn update_metrics_from_state(state: &AppState) {
    let limiter = &state.limiter;
    let burst = limiter.burst_handler().statistics();
    metrics::BurstMetrics::set_active(burst.active_bursts, burst.active_cooldowns);
    metrics::CONFIGURED_IDENTIFIERS.set(limiter.config_store().configured_identifiers() as i64);

    if let Some(pool) = &state.redis_pool {
        metrics::REDIS_CONNECTION_STATUS.set(if pool.health().is_healthy() { 1 } else { 0 });
        metrics::REDIS_CIRCUIT_BREAKER_STATE.set(pool.circuit_breaker().state().as_gauge());
    }
}
