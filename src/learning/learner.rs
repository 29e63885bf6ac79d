//! Learning cycle: history snapshot -> usage patterns -> per-identifier limits

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::burst::BurstHandler;
use crate::callbacks::CallbackList;
use crate::config::LearningSettings;
use crate::metrics::LearningMetrics;
use crate::ratelimit::{ConfigStore, RequestHistory};
use crate::time::current_time_ms;

use super::pattern::{analyze_history, AnalysisParams, UsagePattern};

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("A learning cycle is already running")]
    AlreadyRunning,

    #[error("Usage analysis failed: {0}")]
    Analysis(String),
}

pub type PatternMap = HashMap<String, UsagePattern>;

#[derive(Debug, Clone, Serialize)]
pub struct LearningReport {
    pub records_analyzed: usize,
    pub identifiers_analyzed: usize,
    pub configs_updated: usize,
    /// Learned overrides dropped because their identifier left the history
    pub configs_pruned: usize,
    pub allowances_retuned: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerStats {
    pub enabled: bool,
    pub running: bool,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    /// Unix ms of the last successful cycle, 0 if none
    pub last_cycle_at: i64,
}

/// Clears the single-flight flag however the cycle ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UsagePatternLearner {
    settings: LearningSettings,
    config_store: Arc<ConfigStore>,
    history: Arc<RequestHistory>,
    burst_handler: Arc<BurstHandler>,
    in_cycle: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    last_cycle_at: AtomicI64,
    callbacks: CallbackList<PatternMap>,
}

impl UsagePatternLearner {
    pub fn new(
        settings: LearningSettings,
        config_store: Arc<ConfigStore>,
        history: Arc<RequestHistory>,
        burst_handler: Arc<BurstHandler>,
    ) -> Self {
        Self {
            settings,
            config_store,
            history,
            burst_handler,
            in_cycle: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            last_cycle_at: AtomicI64::new(0),
            callbacks: CallbackList::new("learning"),
        }
    }

    pub fn settings(&self) -> &LearningSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Register an observer for each cycle's pattern map
    pub fn on_patterns_learned<F>(&self, callback: F)
    where
        F: Fn(&PatternMap) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(callback);
    }

    /// Run one cycle. Overlapping calls get `AlreadyRunning`.
    pub async fn run_cycle(&self) -> Result<LearningReport, LearningError> {
        if self
            .in_cycle
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            LearningMetrics::record_skipped();
            return Err(LearningError::AlreadyRunning);
        }
        let _guard = CycleGuard(&self.in_cycle);

        let started = Instant::now();
        match self.analyze_and_apply().await {
            Ok(mut report) => {
                let elapsed = started.elapsed();
                report.duration_ms = elapsed.as_millis() as u64;
                self.cycles_completed.fetch_add(1, Ordering::Relaxed);
                self.last_cycle_at.store(current_time_ms(), Ordering::Release);
                LearningMetrics::record_success(elapsed.as_secs_f64());
                tracing::info!(
                    records = report.records_analyzed,
                    identifiers = report.identifiers_analyzed,
                    configs_updated = report.configs_updated,
                    configs_pruned = report.configs_pruned,
                    allowances_retuned = report.allowances_retuned,
                    duration_ms = report.duration_ms,
                    "Learning cycle completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                LearningMetrics::record_failure();
                Err(e)
            }
        }
    }

    async fn analyze_and_apply(&self) -> Result<LearningReport, LearningError> {
        let records = self.history.snapshot().await;
        let records_analyzed = records.len();
        let seen: HashSet<String> = records.iter().map(|r| r.identifier.clone()).collect();
        let params = AnalysisParams::new(
            &self.settings,
            self.config_store.default_base_limit(),
            self.config_store.factor_bounds(),
        );

        let patterns = tokio::task::spawn_blocking(move || analyze_history(&records, &params))
            .await
            .map_err(|e| LearningError::Analysis(e.to_string()))?;

        let mut configs_updated = 0;
        for pattern in patterns.values() {
            let learned = self
                .config_store
                .apply_learned_limit(&pattern.identifier, pattern.recommended_limit);
            configs_updated += 1;
            tracing::debug!(
                identifier = %pattern.identifier,
                user_type = ?pattern.user_type,
                recommended_limit = pattern.recommended_limit,
                adaptive_factor = learned.adaptive_factor,
                "Learned limit applied"
            );
        }

        let configs_pruned = self.config_store.prune_learned(&seen);
        let allowances_retuned = self.burst_handler.retune_allowances();
        self.callbacks.invoke(&patterns);

        Ok(LearningReport {
            records_analyzed,
            identifiers_analyzed: patterns.len(),
            configs_updated,
            configs_pruned,
            allowances_retuned,
            duration_ms: 0,
        })
    }

    pub fn stats(&self) -> LearnerStats {
        LearnerStats {
            enabled: self.settings.enabled,
            running: self.in_cycle.load(Ordering::Acquire),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            last_cycle_at: self.last_cycle_at.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::BurstConfig;
    use crate::config::RateLimitSettings;
    use crate::ratelimit::{RateLimitConfig, RequestMetadata, RequestRecord};
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;

    fn learner() -> (UsagePatternLearner, Arc<ConfigStore>, Arc<RequestHistory>) {
        let config_store = Arc::new(ConfigStore::from_settings(&RateLimitSettings::default()));
        let history = Arc::new(RequestHistory::new(5000));
        let learner = UsagePatternLearner::new(
            LearningSettings::default(),
            Arc::clone(&config_store),
            Arc::clone(&history),
            Arc::new(BurstHandler::new(BurstConfig::default())),
        );
        (learner, config_store, history)
    }

    async fn push(history: &RequestHistory, identifier: &str, count: i64, spacing_ms: i64) {
        for i in 0..count {
            let mut record = RequestRecord::new(identifier, T0 + i * spacing_ms, &RequestMetadata::default());
            record.status = Some(200);
            record.response_time = Some(0.3);
            history.push(record).await;
        }
    }

    #[tokio::test]
    async fn test_cycle_publishes_learned_configs() {
        let (learner, config_store, history) = learner();
        push(&history, "regular", 20, 30_000).await;
        push(&history, "casual", 3, 60_000).await;

        let report = learner.run_cycle().await.unwrap();
        assert_eq!(report.records_analyzed, 23);
        assert_eq!(report.identifiers_analyzed, 2);
        assert_eq!(report.configs_updated, 2);

        // error rate 0 -> x1.1; response time neutral
        let regular = config_store.resolve("regular");
        assert_eq!(regular.base_limit, 110);
        assert_eq!(regular.burst_limit, 220);

        let casual = config_store.resolve("casual");
        assert_eq!(casual.base_limit, 55);
        assert_eq!(config_store.resolve("other").base_limit, 100);
    }

    #[tokio::test]
    async fn test_adaptive_factor_stays_in_bounds() {
        let (learner, config_store, history) = learner();
        push(&history, "scraper", 1200, 100).await;
        push(&history, "steady", 600, 1_000).await;

        learner.run_cycle().await.unwrap();
        for id in ["scraper", "steady"] {
            let factor = config_store.resolve(id).adaptive_factor;
            assert!((0.5..=2.0).contains(&factor), "{id}: {factor}");
        }
        assert_eq!(config_store.resolve("scraper").adaptive_factor, 0.5);
        assert_eq!(config_store.resolve("steady").adaptive_factor, 2.0);
    }

    #[tokio::test]
    async fn test_callbacks_run_and_failures_are_contained() {
        let (learner, _, history) = learner();
        push(&history, "a", 5, 1_000).await;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        learner.on_patterns_learned(|_| anyhow::bail!("sink offline"));
        learner.on_patterns_learned(move |patterns| {
            seen_clone.store(patterns.len(), Ordering::SeqCst);
            Ok(())
        });

        assert!(learner.run_cycle().await.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(learner.stats().cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (learner, _, _) = learner();
        learner.in_cycle.store(true, Ordering::SeqCst);
        assert!(matches!(
            learner.run_cycle().await,
            Err(LearningError::AlreadyRunning)
        ));

        learner.in_cycle.store(false, Ordering::SeqCst);
        assert!(learner.run_cycle().await.is_ok());
        assert!(!learner.stats().running);
    }

    #[tokio::test]
    async fn test_learned_configs_stay_bounded_across_rounds() {
        let config_store = Arc::new(ConfigStore::from_settings(&RateLimitSettings::default()));
        let history = Arc::new(RequestHistory::new(200));
        let learner = UsagePatternLearner::new(
            LearningSettings::default(),
            Arc::clone(&config_store),
            Arc::clone(&history),
            Arc::new(BurstHandler::new(BurstConfig::default())),
        );
        config_store
            .set_config("pinned", RateLimitConfig::from(&RateLimitSettings::default()))
            .unwrap();

        for round in 0..3 {
            for client in 0..100 {
                push(&history, &format!("client-{round}-{client}"), 2, 1_000).await;
            }
            let report = learner.run_cycle().await.unwrap();
            assert_eq!(report.identifiers_analyzed, 100);
            if round > 0 {
                assert_eq!(report.configs_pruned, 100);
            }
            // 100 live learned configs plus the admin one
            assert_eq!(config_store.configured_identifiers(), 101);
        }
        assert!(config_store.get_override("client-0-0").is_none());
        assert!(config_store.get_override("pinned").is_some());
    }
}
