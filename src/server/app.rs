use axum::{http::HeaderValue, middleware, Router};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{admin_routes, protected_routes, public_routes};

use super::middleware::{admission_middleware, api_key_auth};
use super::AppState;

/// Router with the built-in protected routes
pub fn create_app(state: AppState) -> Router {
    create_app_with(state, protected_routes())
}

/// Router that puts admission control in front of `protected`.
///
/// Health, metrics and admin endpoints are never rate limited.
pub fn create_app_with(state: AppState, protected: Router<AppState>) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origins);

    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        admission_middleware,
    ));
    let admin = admin_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        api_key_auth,
    ));

    Router::new()
        .merge(public_routes())
        .merge(protected)
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
