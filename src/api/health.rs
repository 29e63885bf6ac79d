//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::redis::{CircuitBreakerStats, RedisHealthStats};
use crate::server::AppState;
use crate::store::CounterBackendType;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the counter store is unreachable
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub rate_limiting_enabled: bool,
    pub background_tasks_running: bool,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: CounterBackendType,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub connection: RedisHealthStats,
    pub circuit_breaker: CircuitBreakerStats,
}

/// GET /health - liveness with counter store connectivity.
///
/// Always 200: a store outage only degrades admission to fail-open.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.limiter.store();
    let connected = store.is_connected();

    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        connection: pool.health().stats(),
        circuit_breaker: pool.circuit_breaker().stats(),
    });

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        rate_limiting_enabled: state.limiter.is_enabled(),
        background_tasks_running: state.limiter.is_running(),
        store: StoreHealthResponse {
            backend: store.backend_type(),
            connected,
        },
        redis,
    })
}
