//! Adaptive sliding-window admission control.
//!
//! `evaluate` is the per-request entry point. The only suspension point is the
//! counter store, whose calls are bounded by `store_timeout_ms`; any store
//! failure degrades to an ALLOWED decision.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::burst::{BurstConfig, BurstHandler, BurstStatistics, BurstType};
use crate::callbacks::CallbackList;
use crate::config::Settings;
use crate::learning::{LearnerStats, LearningError, LearningReport, UsagePatternLearner};
use crate::metrics::{AdmissionMetrics, StoreMetrics};
use crate::store::{CounterBackendType, CounterStore, StoreError};
use crate::tasks::BackgroundTasks;
use crate::time::current_time_ms;

use super::config::{AccessList, ConfigStore, RateLimitConfig};
use super::history::{RequestHistory, RequestMetadata, RequestRecord};

#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Identifier is blacklisted; never retried, never fails open
    #[error("Identifier {identifier} is blacklisted")]
    PermissionDenied { identifier: String },

    #[error("Identifier {identifier} is whitelisted and cannot be cooled down")]
    CooldownRejected { identifier: String },

    #[error("Invalid rate limit config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitStatus {
    Allowed,
    /// Over the normal limit but inside a granted burst allowance
    Limited,
    Blocked,
    Whitelisted,
}

impl RateLimitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitStatus::Allowed => "allowed",
            RateLimitStatus::Limited => "limited",
            RateLimitStatus::Blocked => "blocked",
            RateLimitStatus::Whitelisted => "whitelisted",
        }
    }

    /// Value of the `X-RateLimit-Status` response header
    pub fn as_header_str(self) -> &'static str {
        match self {
            RateLimitStatus::Allowed => "ALLOWED",
            RateLimitStatus::Limited => "LIMITED",
            RateLimitStatus::Blocked => "BLOCKED",
            RateLimitStatus::Whitelisted => "WHITELISTED",
        }
    }

    /// Whether the request may proceed
    pub fn is_admitted(self) -> bool {
        !matches!(self, RateLimitStatus::Blocked)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub identifier: String,
    pub status: RateLimitStatus,
    /// Enforced normal limit, floor(base_limit x adaptive_factor)
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window has fully rolled over
    pub reset_time: i64,
    /// Requests already in the window when this one arrived
    pub requests_count: u64,
    /// Granted limit while a burst allowance applies
    pub burst_limit: Option<u32>,
    pub burst_type: Option<BurstType>,
    /// Set when a store failure forced a fail-open decision
    pub degraded: bool,
    /// Evaluation time, Unix ms
    pub timestamp: i64,
}

impl RateLimitDecision {
    /// Seconds until the window resets, at least one
    pub fn retry_after(&self) -> u64 {
        let now_secs = self.timestamp / 1000;
        (self.reset_time - now_secs).max(1) as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatistics {
    pub total_requests: u64,
    pub configured_identifiers: usize,
    pub learning_enabled: bool,
    pub running: bool,
    pub store_connected: bool,
    pub store_backend: CounterBackendType,
    pub history_size: usize,
    /// Unix seconds
    pub timestamp: i64,
    pub burst: BurstStatistics,
    pub learner: LearnerStats,
}

pub struct AdaptiveRateLimiter {
    enabled: bool,
    store_timeout: Duration,
    monitor_interval: Duration,
    config_store: Arc<ConfigStore>,
    store: Arc<dyn CounterStore>,
    history: Arc<RequestHistory>,
    burst_handler: Arc<BurstHandler>,
    learner: Arc<UsagePatternLearner>,
    running: AtomicBool,
    total_requests: AtomicU64,
    on_limit_exceeded: CallbackList<RateLimitDecision>,
}

impl AdaptiveRateLimiter {
    pub fn new(settings: &Settings, store: Arc<dyn CounterStore>) -> Self {
        let config_store = Arc::new(ConfigStore::from_settings(&settings.ratelimit));
        let history = Arc::new(RequestHistory::new(settings.ratelimit.history_size));
        let burst_handler = Arc::new(BurstHandler::new(BurstConfig::from_settings(
            &settings.burst,
            settings.ratelimit.window_size_seconds,
        )));
        let learner = Arc::new(UsagePatternLearner::new(
            settings.learning.clone(),
            Arc::clone(&config_store),
            Arc::clone(&history),
            Arc::clone(&burst_handler),
        ));

        Self {
            enabled: settings.ratelimit.enabled,
            store_timeout: Duration::from_millis(settings.ratelimit.store_timeout_ms.max(1)),
            monitor_interval: Duration::from_secs(settings.burst.monitor_interval_seconds.max(1)),
            config_store,
            store,
            history,
            burst_handler,
            learner,
            running: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            on_limit_exceeded: CallbackList::new("limit_exceeded"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<RequestHistory> {
        &self.history
    }

    pub fn burst_handler(&self) -> &Arc<BurstHandler> {
        &self.burst_handler
    }

    pub fn learner(&self) -> &Arc<UsagePatternLearner> {
        &self.learner
    }

    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    pub async fn evaluate(
        &self,
        identifier: &str,
        metadata: &RequestMetadata,
    ) -> Result<RateLimitDecision, AdmissionError> {
        self.evaluate_at(identifier, metadata, current_time_ms()).await
    }

    /// Evaluate one request arriving at `now` (Unix ms).
    ///
    /// Only a blacklist hit is returned as an error.
    pub async fn evaluate_at(
        &self,
        identifier: &str,
        metadata: &RequestMetadata,
        now: i64,
    ) -> Result<RateLimitDecision, AdmissionError> {
        let started = Instant::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let config = self.config_store.resolve(identifier);
        let adaptive_limit = config.adaptive_limit();
        let reset_time = now / 1000 + config.window_size as i64;

        if config.is_whitelisted(identifier) {
            AdmissionMetrics::record_decision(RateLimitStatus::Whitelisted.as_str());
            return Ok(RateLimitDecision {
                identifier: identifier.to_string(),
                status: RateLimitStatus::Whitelisted,
                limit: adaptive_limit,
                remaining: adaptive_limit,
                reset_time,
                requests_count: 0,
                burst_limit: None,
                burst_type: None,
                degraded: false,
                timestamp: now,
            });
        }

        if config.is_blacklisted(identifier) {
            AdmissionMetrics::record_denied();
            tracing::warn!(identifier = %identifier, "Blacklisted identifier rejected");
            return Err(AdmissionError::PermissionDenied {
                identifier: identifier.to_string(),
            });
        }

        let window_start = now - config.window_ms();
        let count = self
            .bounded(self.store.count_in_window(identifier, window_start, now))
            .await;

        let decision = match count {
            Ok(count) => self.decide(identifier, count, adaptive_limit, reset_time, metadata, now),
            Err(e) => {
                StoreMetrics::record_error("count");
                AdmissionMetrics::record_fail_open();
                tracing::warn!(
                    identifier = %identifier,
                    error = %e,
                    "Counter store unavailable, failing open"
                );
                RateLimitDecision {
                    identifier: identifier.to_string(),
                    status: RateLimitStatus::Allowed,
                    limit: adaptive_limit,
                    remaining: adaptive_limit,
                    reset_time,
                    requests_count: 0,
                    burst_limit: None,
                    burst_type: None,
                    degraded: true,
                    timestamp: now,
                }
            }
        };

        self.record_request(identifier, &config, metadata, now).await;

        AdmissionMetrics::record_decision(decision.status.as_str());
        AdmissionMetrics::observe_latency(started.elapsed().as_secs_f64());

        if decision.status == RateLimitStatus::Blocked {
            tracing::info!(
                identifier = %identifier,
                requests_count = decision.requests_count,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            self.on_limit_exceeded.invoke(&decision);
        }

        Ok(decision)
    }

    fn decide(
        &self,
        identifier: &str,
        count: u64,
        adaptive_limit: u32,
        reset_time: i64,
        metadata: &RequestMetadata,
        now: i64,
    ) -> RateLimitDecision {
        let mut decision = RateLimitDecision {
            identifier: identifier.to_string(),
            status: RateLimitStatus::Allowed,
            limit: adaptive_limit,
            remaining: 0,
            reset_time,
            requests_count: count,
            burst_limit: None,
            burst_type: None,
            degraded: false,
            timestamp: now,
        };

        if count < adaptive_limit as u64 {
            decision.remaining = remaining_after(adaptive_limit, count);
            return decision;
        }

        let burst = self.burst_handler.check_burst_allowance_at(
            identifier,
            count,
            adaptive_limit,
            metadata,
            now,
        );

        if burst.allowed {
            decision.burst_type = Some(burst.burst_type);
            if count < burst.limit as u64 {
                decision.status = RateLimitStatus::Limited;
                decision.burst_limit = Some(burst.limit);
                decision.remaining = remaining_after(burst.limit, count);
                return decision;
            }
        }

        decision.status = RateLimitStatus::Blocked;
        decision
    }

    /// Counter store and history side effects for a counted request
    async fn record_request(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        metadata: &RequestMetadata,
        now: i64,
    ) {
        if let Err(e) = self
            .bounded(self.store.record(identifier, now, config.window_size))
            .await
        {
            StoreMetrics::record_error("record");
            tracing::warn!(identifier = %identifier, error = %e, "Failed to record request");
        }

        self.burst_handler.track_request(identifier, now);

        if self.learner.is_enabled() {
            self.history
                .push(RequestRecord::new(identifier, now, metadata))
                .await;
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout.as_millis() as u64)),
        }
    }

    /// Attach the response outcome to the history record of an admitted request
    pub async fn annotate_response(
        &self,
        identifier: &str,
        timestamp: i64,
        status: u16,
        response_time: f64,
    ) {
        if self.learner.is_enabled() {
            self.history
                .annotate(identifier, timestamp, status, response_time)
                .await;
        }
    }

    pub fn on_limit_exceeded<F>(&self, callback: F)
    where
        F: Fn(&RateLimitDecision) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_limit_exceeded.register(callback);
    }

    /// Whitelisting ends any active burst and lifts any cooldown
    pub fn add_to_whitelist(&self, identifier: &str) {
        self.config_store
            .update_access_list(identifier, AccessList::Whitelist, true);
        self.burst_handler.release(identifier);
    }

    pub fn remove_from_whitelist(&self, identifier: &str) {
        self.config_store
            .update_access_list(identifier, AccessList::Whitelist, false);
    }

    pub fn add_to_blacklist(&self, identifier: &str) {
        self.config_store
            .update_access_list(identifier, AccessList::Blacklist, true);
    }

    pub fn remove_from_blacklist(&self, identifier: &str) {
        self.config_store
            .update_access_list(identifier, AccessList::Blacklist, false);
    }

    pub fn force_cooldown(&self, identifier: &str, duration_seconds: u64) -> Result<(), AdmissionError> {
        if self.config_store.resolve(identifier).is_whitelisted(identifier) {
            return Err(AdmissionError::CooldownRejected {
                identifier: identifier.to_string(),
            });
        }
        self.burst_handler.force_cooldown(identifier, duration_seconds);
        Ok(())
    }

    /// Config currently applied to `identifier`
    pub fn get_config(&self, identifier: &str) -> Arc<RateLimitConfig> {
        self.config_store.resolve(identifier)
    }

    pub fn set_config(&self, identifier: &str, config: RateLimitConfig) -> Result<(), AdmissionError> {
        self.config_store.set_config(identifier, config)
    }

    pub async fn run_learning_cycle(&self) -> Result<LearningReport, LearningError> {
        self.learner.run_cycle().await
    }

    pub async fn get_statistics(&self) -> LimiterStatistics {
        LimiterStatistics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            configured_identifiers: self.config_store.configured_identifiers(),
            learning_enabled: self.learner.is_enabled(),
            running: self.is_running(),
            store_connected: self.store.is_connected(),
            store_backend: self.store.backend_type(),
            history_size: self.history.len().await,
            timestamp: current_time_ms() / 1000,
            burst: self.burst_handler.statistics(),
            learner: self.learner.stats(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Spawn the learner and burst monitor tasks
    pub fn start(self: &Arc<Self>) -> BackgroundTasks {
        BackgroundTasks::spawn(Arc::clone(self))
    }
}

fn remaining_after(limit: u32, count: u64) -> u32 {
    (limit as u64).saturating_sub(count + 1) as u32
}
