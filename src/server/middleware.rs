use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::error::AppError;
use crate::ratelimit::{extract_metadata, is_subrequest, RateLimitDecision, RateLimitStatus};

/// API key check for the admin endpoints.
///
/// Validates `X-API-Key` against `admin.api_key`; open when no key is set.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected_key) = &state.settings.admin.api_key else {
        return Ok(next.run(req).await);
    };

    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Invalid admin API key provided");
            Err(AppError::Auth("Invalid API key".to_string()))
        }
        None => {
            tracing::warn!("Missing admin API key header");
            Err(AppError::Auth("Missing API key".to_string()))
        }
    }
}

/// Admission control in front of the protected routes.
///
/// BLOCKED becomes 429 and a blacklist hit 403. Admitted requests carry
/// `X-RateLimit-*` headers, the decision is available to handlers as a
/// request extension, and the response outcome is fed back to the history.
/// Auth subrequests are classified by the proxied request and skip the
/// feedback, since their own response says nothing about the upstream call.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let identifier = state.resolver.resolve(req.headers(), peer);
    let metadata = extract_metadata(req.method(), req.uri(), req.headers());
    let subrequest = is_subrequest(req.headers());

    let decision = match state.limiter.evaluate(&identifier, &metadata).await {
        Ok(decision) => decision,
        Err(e) => return AppError::from(e).into_response(),
    };

    if decision.status == RateLimitStatus::Blocked {
        return AppError::RateLimited {
            limit: decision.limit,
            reset_time: decision.reset_time,
            retry_after: decision.retry_after(),
        }
        .into_response();
    }

    req.extensions_mut().insert(decision.clone());
    let started = Instant::now();
    let mut response = next.run(req).await;

    if !subrequest {
        state
            .limiter
            .annotate_response(
                &identifier,
                decision.timestamp,
                response.status().as_u16(),
                started.elapsed().as_secs_f64(),
            )
            .await;
    }

    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let mut set = |name: &'static str, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };

    set("X-RateLimit-Limit", decision.limit.to_string());
    set("X-RateLimit-Remaining", decision.remaining.to_string());
    set("X-RateLimit-Reset", decision.reset_time.to_string());
    set("X-RateLimit-Status", decision.status.as_header_str().to_string());
    if let Some(burst_limit) = decision.burst_limit {
        set("X-RateLimit-Burst-Limit", burst_limit.to_string());
    }
}
