use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::admin::{
    add_blacklist, add_whitelist, burst_overview, delete_config, force_cooldown, get_config,
    put_config, remove_blacklist, remove_whitelist, run_learning, stats,
};
use super::admission::admission_check;
use super::health::health;
use super::metrics::prometheus_metrics;

/// Endpoints that are never rate limited
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

/// Routes placed behind admission control
pub fn protected_routes() -> Router<AppState> {
    Router::new().nest(
        "/api/v1",
        Router::new().route("/admission", get(admission_check).post(admission_check)),
    )
}

/// Operator endpoints, mounted under `/admin`
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/bursts", get(burst_overview))
        .route(
            "/whitelist/{id}",
            post(add_whitelist).delete(remove_whitelist),
        )
        .route(
            "/blacklist/{id}",
            post(add_blacklist).delete(remove_blacklist),
        )
        .route("/cooldown/{id}", post(force_cooldown))
        .route(
            "/config/{id}",
            get(get_config).put(put_config).delete(delete_config),
        )
        .route("/learning/run", post(run_learning))
}
