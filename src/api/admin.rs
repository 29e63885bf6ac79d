//! Operator endpoints: access lists, cooldowns, per-identifier config,
//! statistics and on-demand learning.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::burst::BurstEvent;
use crate::error::AppError;
use crate::learning::{LearningError, LearningReport};
use crate::ratelimit::{LimiterStatistics, RateLimitConfig};
use crate::server::AppState;

/// Archived bursts returned by the overview
const ARCHIVE_PAGE: usize = 50;

#[derive(Debug, Serialize)]
pub struct AccessListResponse {
    pub identifier: String,
    pub list: &'static str,
    pub listed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CooldownRequest {
    /// Defaults to the configured burst cooldown
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CooldownResponse {
    pub identifier: String,
    pub duration_seconds: u64,
    /// Unix ms
    pub expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub identifier: String,
    /// False when the process default applies
    pub overridden: bool,
    pub adaptive_limit: u32,
    pub config: RateLimitConfig,
}

#[derive(Debug, Serialize)]
pub struct BurstOverviewResponse {
    pub active: Vec<BurstEvent>,
    pub recent: Vec<BurstEvent>,
}

/// GET /admin/stats - limiter, burst and learner statistics
#[tracing::instrument(name = "http.admin_stats", skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<LimiterStatistics> {
    Json(state.limiter.get_statistics().await)
}

/// GET /admin/bursts - active bursts and the most recent finished ones
#[tracing::instrument(name = "http.admin_bursts", skip(state))]
pub async fn burst_overview(State(state): State<AppState>) -> Json<BurstOverviewResponse> {
    let handler = state.limiter.burst_handler();
    Json(BurstOverviewResponse {
        active: handler.active_bursts(),
        recent: handler.archived(ARCHIVE_PAGE),
    })
}

/// POST /admin/whitelist/{id}
#[tracing::instrument(name = "http.whitelist_add", skip(state))]
pub async fn add_whitelist(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<AccessListResponse> {
    state.limiter.add_to_whitelist(&identifier);
    tracing::info!(identifier = %identifier, "Identifier whitelisted");
    Json(access_list_response(identifier, "whitelist", true))
}

/// DELETE /admin/whitelist/{id}
#[tracing::instrument(name = "http.whitelist_remove", skip(state))]
pub async fn remove_whitelist(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<AccessListResponse> {
    state.limiter.remove_from_whitelist(&identifier);
    tracing::info!(identifier = %identifier, "Identifier removed from whitelist");
    Json(access_list_response(identifier, "whitelist", false))
}

/// POST /admin/blacklist/{id}
#[tracing::instrument(name = "http.blacklist_add", skip(state))]
pub async fn add_blacklist(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<AccessListResponse> {
    state.limiter.add_to_blacklist(&identifier);
    tracing::info!(identifier = %identifier, "Identifier blacklisted");
    Json(access_list_response(identifier, "blacklist", true))
}

/// DELETE /admin/blacklist/{id}
#[tracing::instrument(name = "http.blacklist_remove", skip(state))]
pub async fn remove_blacklist(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<AccessListResponse> {
    state.limiter.remove_from_blacklist(&identifier);
    tracing::info!(identifier = %identifier, "Identifier removed from blacklist");
    Json(access_list_response(identifier, "blacklist", false))
}

fn access_list_response(identifier: String, list: &'static str, listed: bool) -> AccessListResponse {
    AccessListResponse {
        identifier,
        list,
        listed,
    }
}

/// POST /admin/cooldown/{id} - force a cooldown, 409 for whitelisted ids
#[tracing::instrument(name = "http.force_cooldown", skip(state, body))]
pub async fn force_cooldown(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    body: Option<Json<CooldownRequest>>,
) -> Result<Json<CooldownResponse>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let duration_seconds = request
        .duration_seconds
        .unwrap_or(state.limiter.burst_handler().config().cooldown_seconds);

    state.limiter.force_cooldown(&identifier, duration_seconds)?;
    tracing::warn!(
        identifier = %identifier,
        duration_seconds,
        "Cooldown forced by operator"
    );

    let expires_at = state.limiter.burst_handler().cooldown_expiry(&identifier);
    Ok(Json(CooldownResponse {
        identifier,
        duration_seconds,
        expires_at,
    }))
}

/// GET /admin/config/{id} - config currently applied to an identifier
#[tracing::instrument(name = "http.get_config", skip(state))]
pub async fn get_config(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Json<ConfigResponse> {
    Json(config_response(&state, identifier))
}

/// PUT /admin/config/{id} - replace the identifier's override
#[tracing::instrument(name = "http.put_config", skip(state, config))]
pub async fn put_config(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Json(config): Json<RateLimitConfig>,
) -> Result<Json<ConfigResponse>, AppError> {
    state.limiter.set_config(&identifier, config)?;
    tracing::info!(identifier = %identifier, "Identifier config replaced");
    Ok(Json(config_response(&state, identifier)))
}

/// DELETE /admin/config/{id} - drop the override, reverting to the default
#[tracing::instrument(name = "http.delete_config", skip(state))]
pub async fn delete_config(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.limiter.config_store().remove_config(&identifier) {
        tracing::info!(identifier = %identifier, "Identifier config removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "No config override for identifier '{}'",
            identifier
        )))
    }
}

fn config_response(state: &AppState, identifier: String) -> ConfigResponse {
    let overridden = state
        .limiter
        .config_store()
        .get_override(&identifier)
        .is_some();
    let config = state.limiter.get_config(&identifier);

    ConfigResponse {
        identifier,
        overridden,
        adaptive_limit: config.adaptive_limit(),
        config: config.as_ref().clone(),
    }
}

/// POST /admin/learning/run - run one learning cycle now
#[tracing::instrument(name = "http.run_learning", skip(state))]
pub async fn run_learning(State(state): State<AppState>) -> Result<Json<LearningReport>, AppError> {
    match state.limiter.run_learning_cycle().await {
        Ok(report) => Ok(Json(report)),
        Err(e @ LearningError::AlreadyRunning) => Err(AppError::Conflict(e.to_string())),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}
