//! Burst allowance state machine.
//!
//! Per identifier: NONE -> ACTIVE_BURST -> (COOLDOWN | NONE). An active burst
//! keeps its granted limit until it expires; expiry is driven by wall-clock
//! comparison in `sweep_at` and lazily on the next check.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::callbacks::CallbackList;
use crate::metrics::BurstMetrics;
use crate::ratelimit::RequestMetadata;

use super::classifier::{BurstClassifier, BurstContext, ClassifierRule};
use super::types::{BurstConfig, BurstDecision, BurstEvent, BurstType};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BurstTypeCounts {
    pub legitimate: u64,
    pub suspicious: u64,
    pub malicious: u64,
    pub unknown: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurstStatistics {
    pub enabled: bool,
    pub active_bursts: usize,
    pub active_cooldowns: usize,
    pub archived_bursts: usize,
    pub detected_by_type: BurstTypeCounts,
    pub tracked_identifiers: usize,
    pub allowance_overrides: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_bursts: usize,
    pub expired_cooldowns: usize,
}

pub struct BurstHandler {
    config: BurstConfig,
    classifier: BurstClassifier,
    active: DashMap<String, BurstEvent>,
    /// Identifier -> cooldown expiry, Unix ms
    cooldowns: DashMap<String, i64>,
    archive: Mutex<VecDeque<BurstEvent>>,
    /// Request timestamps inside the rapid-fire window
    recent_requests: DashMap<String, VecDeque<i64>>,
    /// Per-identifier base allowance after re-tuning
    allowances: DashMap<String, f64>,
    detected: [AtomicU64; 4],
    on_detected: CallbackList<BurstEvent>,
    on_ended: CallbackList<BurstEvent>,
}

impl BurstHandler {
    pub fn new(config: BurstConfig) -> Self {
        let classifier = BurstClassifier::with_default_rules(&config);
        Self::with_classifier(config, classifier)
    }

    pub fn with_classifier(config: BurstConfig, classifier: BurstClassifier) -> Self {
        Self {
            config,
            classifier,
            active: DashMap::new(),
            cooldowns: DashMap::new(),
            archive: Mutex::new(VecDeque::new()),
            recent_requests: DashMap::new(),
            allowances: DashMap::new(),
            detected: Default::default(),
            on_detected: CallbackList::new("burst_detected"),
            on_ended: CallbackList::new("burst_ended"),
        }
    }

    pub fn config(&self) -> &BurstConfig {
        &self.config
    }

    pub fn classifier(&self) -> &BurstClassifier {
        &self.classifier
    }

    pub fn add_rule(&self, rule: Arc<dyn ClassifierRule>) {
        self.classifier.add_rule(rule);
    }

    pub fn on_burst_detected<F>(&self, callback: F)
    where
        F: Fn(&BurstEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_detected.register(callback);
    }

    pub fn on_burst_ended<F>(&self, callback: F)
    where
        F: Fn(&BurstEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_ended.register(callback);
    }

    pub fn check_burst_allowance(
        &self,
        identifier: &str,
        current_count: u64,
        normal_limit: u32,
        metadata: &RequestMetadata,
    ) -> BurstDecision {
        self.check_burst_allowance_at(
            identifier,
            current_count,
            normal_limit,
            metadata,
            crate::time::current_time_ms(),
        )
    }

    /// Decide whether `identifier` may exceed `normal_limit` at time `now`.
    ///
    /// Classification errors deny the allowance.
    pub fn check_burst_allowance_at(
        &self,
        identifier: &str,
        current_count: u64,
        normal_limit: u32,
        metadata: &RequestMetadata,
        now: i64,
    ) -> BurstDecision {
        if !self.config.enabled {
            return BurstDecision::denied(normal_limit);
        }

        // An unswept expired burst ends here so it is archived exactly once
        let expired = self
            .active
            .remove_if(identifier, |_, event| event.is_expired_at(now));
        if let Some((_, event)) = expired {
            self.finish_burst(event, now);
        }

        if self.is_cooling_down_at(identifier, now) {
            tracing::debug!(identifier = %identifier, "Burst check rejected during cooldown");
            return BurstDecision::denied(normal_limit);
        }

        if let Some(event) = self.active.get(identifier) {
            return BurstDecision {
                allowed: true,
                limit: event.burst_limit,
                burst_type: event.burst_type,
            };
        }

        let threshold = normal_limit as f64 * self.config.detection_threshold;
        if (current_count as f64) < threshold {
            return BurstDecision::denied(normal_limit);
        }

        let recent_bursts = self.archived_types_for(identifier);
        let recent_requests = self.recent_request_count(identifier, now);
        let ctx = BurstContext {
            identifier,
            current_count,
            normal_limit,
            metadata,
            recent_requests,
            recent_bursts: &recent_bursts,
        };

        let burst_type = match self.classifier.classify(&ctx) {
            Ok(burst_type) => burst_type,
            Err(e) => {
                BurstMetrics::record_classification_error();
                tracing::warn!(
                    identifier = %identifier,
                    error = %e,
                    "Burst classification failed, enforcing normal limit"
                );
                return BurstDecision::denied(normal_limit);
            }
        };

        let confidence = BurstClassifier::confidence(burst_type, metadata);
        let multiplier = (self.allowance_for(identifier) * confidence).min(self.config.max_allowance);
        let burst_limit = (multiplier * normal_limit as f64).floor() as u32;

        let event = BurstEvent {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            burst_type,
            request_count: current_count,
            normal_limit,
            burst_limit,
            duration_seconds: self.config.burst_duration_seconds,
            timestamp: now,
            expires_at: now + self.config.burst_duration_seconds as i64 * 1000,
            confidence,
            metadata: metadata.clone(),
        };

        // A concurrent check may have created the burst first; that one wins
        let created = match self.active.entry(identifier.to_string()) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                return BurstDecision {
                    allowed: true,
                    limit: existing.burst_limit,
                    burst_type: existing.burst_type,
                };
            }
            Entry::Vacant(slot) => slot.insert(event).value().clone(),
        };

        self.detected[burst_type.index()].fetch_add(1, Ordering::Relaxed);
        BurstMetrics::record_detected(burst_type.as_str());
        tracing::info!(
            identifier = %identifier,
            burst_type = burst_type.as_str(),
            confidence = confidence,
            request_count = current_count,
            normal_limit = normal_limit,
            burst_limit = burst_limit,
            "Burst detected"
        );
        self.on_detected.invoke(&created);

        BurstDecision {
            allowed: true,
            limit: burst_limit,
            burst_type,
        }
    }

    /// Note a counted request for the rapid-fire rule
    pub fn track_request(&self, identifier: &str, now: i64) {
        let window_start = now - self.rapid_window_ms();
        let mut entry = self.recent_requests.entry(identifier.to_string()).or_default();
        let timestamps = entry.value_mut();
        while timestamps.front().is_some_and(|ts| *ts < window_start) {
            timestamps.pop_front();
        }
        timestamps.push_back(now);
    }

    fn recent_request_count(&self, identifier: &str, now: i64) -> usize {
        let window_start = now - self.rapid_window_ms();
        self.recent_requests
            .get(identifier)
            .map(|ts| ts.iter().filter(|t| **t >= window_start).count())
            .unwrap_or(0)
    }

    fn rapid_window_ms(&self) -> i64 {
        self.config.rapid_fire_window_seconds as i64 * 1000
    }

    fn allowance_for(&self, identifier: &str) -> f64 {
        self.allowances
            .get(identifier)
            .map(|a| *a.value())
            .unwrap_or(self.config.base_allowance)
    }

    pub fn is_cooling_down_at(&self, identifier: &str, now: i64) -> bool {
        self.cooldowns
            .get(identifier)
            .is_some_and(|expiry| now < *expiry)
    }

    pub fn cooldown_expiry(&self, identifier: &str) -> Option<i64> {
        self.cooldowns.get(identifier).map(|e| *e.value())
    }

    pub fn force_cooldown(&self, identifier: &str, duration_seconds: u64) {
        self.force_cooldown_at(identifier, duration_seconds, crate::time::current_time_ms());
    }

    /// Place `identifier` in cooldown until `now + duration`.
    ///
    /// Any active burst ends immediately.
    pub fn force_cooldown_at(&self, identifier: &str, duration_seconds: u64, now: i64) {
        if let Some((_, event)) = self.active.remove(identifier) {
            self.archive_event(event.clone());
            self.on_ended.invoke(&event);
        }

        let expiry = now + duration_seconds as i64 * 1000;
        self.cooldowns.insert(identifier.to_string(), expiry);
        tracing::info!(
            identifier = %identifier,
            duration_seconds = duration_seconds,
            "Cooldown applied"
        );
        self.publish_gauges();
    }

    pub fn clear_cooldown(&self, identifier: &str) -> bool {
        let removed = self.cooldowns.remove(identifier).is_some();
        if removed {
            self.publish_gauges();
        }
        removed
    }

    /// End any active burst and lift any cooldown for `identifier`.
    ///
    /// The burst is archived as-is but never turns into a cooldown, so a
    /// released identifier is not penalised when the window would have run out.
    pub fn release(&self, identifier: &str) {
        if let Some((_, event)) = self.active.remove(identifier) {
            tracing::info!(
                identifier = %identifier,
                burst_type = event.burst_type.as_str(),
                "Burst released"
            );
            self.archive_event(event.clone());
            self.on_ended.invoke(&event);
        }
        self.cooldowns.remove(identifier);
        self.publish_gauges();
    }

    pub fn active_burst(&self, identifier: &str) -> Option<BurstEvent> {
        self.active.get(identifier).map(|e| e.value().clone())
    }

    pub fn active_bursts(&self) -> Vec<BurstEvent> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    /// Most recent archived bursts, newest first
    pub fn archived(&self, limit: usize) -> Vec<BurstEvent> {
        self.lock_archive().iter().rev().take(limit).cloned().collect()
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(crate::time::current_time_ms())
    }

    /// Expire stale bursts and cooldowns as of `now`
    pub fn sweep_at(&self, now: i64) -> SweepReport {
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|e| e.value().is_expired_at(now))
            .map(|e| e.key().clone())
            .collect();

        let mut report = SweepReport::default();
        for identifier in stale {
            if let Some((_, event)) = self
                .active
                .remove_if(&identifier, |_, event| event.is_expired_at(now))
            {
                self.finish_burst(event, now);
                report.expired_bursts += 1;
            }
        }

        let cooldowns_before = self.cooldowns.len();
        self.cooldowns.retain(|_, expiry| now < *expiry);
        report.expired_cooldowns = cooldowns_before.saturating_sub(self.cooldowns.len());

        let window_start = now - self.rapid_window_ms();
        self.recent_requests.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|ts| *ts < window_start) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });

        self.publish_gauges();
        if report != SweepReport::default() {
            tracing::debug!(
                expired_bursts = report.expired_bursts,
                expired_cooldowns = report.expired_cooldowns,
                "Burst sweep completed"
            );
        }
        report
    }

    /// Archive an expired burst; malicious bursts leave the identifier in cooldown
    fn finish_burst(&self, event: BurstEvent, now: i64) {
        if event.burst_type == BurstType::Malicious {
            let expiry = now + self.config.cooldown_seconds as i64 * 1000;
            self.cooldowns.insert(event.identifier.clone(), expiry);
        }

        tracing::info!(
            identifier = %event.identifier,
            burst_type = event.burst_type.as_str(),
            "Burst ended"
        );
        self.archive_event(event.clone());
        self.on_ended.invoke(&event);
    }

    fn archive_event(&self, event: BurstEvent) {
        let mut archive = self.lock_archive();
        while archive.len() >= self.config.max_history {
            archive.pop_front();
        }
        archive.push_back(event);
    }

    fn archived_types_for(&self, identifier: &str) -> Vec<BurstType> {
        let archive = self.lock_archive();
        let mut types: Vec<BurstType> = archive
            .iter()
            .rev()
            .filter(|e| e.identifier == identifier)
            .take(self.config.malicious_history_window)
            .map(|e| e.burst_type)
            .collect();
        types.reverse();
        types
    }

    fn lock_archive(&self) -> MutexGuard<'_, VecDeque<BurstEvent>> {
        // The archive is append/evict only; a panicked writer cannot leave it torn
        self.archive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-tune per-identifier allowances from their recent archived bursts.
    ///
    /// Returns how many identifiers changed.
    pub fn retune_allowances(&self) -> usize {
        let mut by_identifier: HashMap<String, Vec<BurstType>> = HashMap::new();
        {
            let archive = self.lock_archive();
            for event in archive.iter() {
                by_identifier
                    .entry(event.identifier.clone())
                    .or_default()
                    .push(event.burst_type);
            }
        }

        // Identifiers that aged out of the archive fall back to the base allowance
        let before = self.allowances.len();
        self.allowances
            .retain(|identifier, _| by_identifier.contains_key(identifier));
        let pruned = before.saturating_sub(self.allowances.len());
        if pruned > 0 {
            tracing::debug!(pruned = pruned, "Stale burst allowances dropped");
        }

        let mut changed = 0;
        for (identifier, types) in by_identifier {
            let recent: Vec<BurstType> = types
                .iter()
                .rev()
                .take(self.config.retune_window)
                .copied()
                .collect();
            let legitimate = recent
                .iter()
                .filter(|t| **t == BurstType::Legitimate)
                .count();
            let ratio = legitimate as f64 / recent.len() as f64;

            let current = self.allowance_for(&identifier);
            let next = if ratio > 0.8 {
                (current * 1.1).min(self.config.max_allowance)
            } else if ratio < 0.3 {
                (current * 0.9).max(1.0)
            } else {
                current
            };

            if (next - current).abs() > f64::EPSILON {
                tracing::debug!(
                    identifier = %identifier,
                    legitimate_ratio = ratio,
                    allowance = next,
                    "Burst allowance re-tuned"
                );
                self.allowances.insert(identifier, next);
                changed += 1;
            }
        }
        changed
    }

    pub fn allowance(&self, identifier: &str) -> f64 {
        self.allowance_for(identifier)
    }

    pub fn statistics(&self) -> BurstStatistics {
        let count = |t: BurstType| self.detected[t.index()].load(Ordering::Relaxed);
        BurstStatistics {
            enabled: self.config.enabled,
            active_bursts: self.active.len(),
            active_cooldowns: self.cooldowns.len(),
            archived_bursts: self.lock_archive().len(),
            detected_by_type: BurstTypeCounts {
                legitimate: count(BurstType::Legitimate),
                suspicious: count(BurstType::Suspicious),
                malicious: count(BurstType::Malicious),
                unknown: count(BurstType::Unknown),
            },
            tracked_identifiers: self.recent_requests.len(),
            allowance_overrides: self.allowances.len(),
        }
    }

    fn publish_gauges(&self) {
        BurstMetrics::set_active(self.active.len(), self.cooldowns.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::classifier::ClassificationError;
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;
    const BROWSER: &str = "Mozilla/5.0 (Macintosh) Safari/605.1.15";

    fn metadata(path: &str, user_agent: Option<&str>) -> RequestMetadata {
        RequestMetadata {
            method: "GET".to_string(),
            path: path.to_string(),
            user_agent: user_agent.map(str::to_string),
            referer: None,
        }
    }

    fn handler() -> BurstHandler {
        BurstHandler::new(BurstConfig::default())
    }

    #[test]
    fn test_scripted_client_gets_suspicious_allowance() {
        let handler = handler();
        let m = metadata("/api/users", Some("python-requests/2.28"));
        for i in 0..25 {
            handler.track_request("198.51.100.4", T0 + i * 320);
        }

        let decision = handler.check_burst_allowance_at("198.51.100.4", 125, 100, &m, T0 + 8_000);
        assert!(decision.allowed);
        assert_eq!(decision.burst_type, BurstType::Suspicious);
        let expected = ((2.0_f64 * 0.7).min(5.0) * 100.0).floor() as u32;
        assert_eq!(decision.limit, expected);

        let event = handler.active_burst("198.51.100.4").unwrap();
        assert!((event.confidence - 0.7).abs() < 1e-9);
        assert_eq!(event.expires_at, T0 + 8_000 + 60_000);
    }

    #[test]
    fn test_active_burst_is_idempotent() {
        let handler = handler();
        let first = handler.check_burst_allowance_at("a", 100, 100, &metadata("/", Some(BROWSER)), T0);
        let second = handler.check_burst_allowance_at(
            "a",
            180,
            100,
            &metadata("/api/x", Some("curl/8.0")),
            T0 + 1_000,
        );

        assert_eq!(first, second);
        assert_eq!(handler.statistics().active_bursts, 1);
        assert_eq!(handler.statistics().detected_by_type.legitimate, 1);
    }

    #[test]
    fn test_granted_limit_never_exceeds_max_allowance() {
        let config = BurstConfig {
            base_allowance: 4.9,
            max_allowance: 5.0,
            ..Default::default()
        };
        let handler = BurstHandler::new(config);
        let mut m = metadata("/", Some(BROWSER));
        m.referer = Some("https://example.com/".to_string());

        let decision = handler.check_burst_allowance_at("b", 100, 100, &m, T0);
        assert!(decision.allowed);
        assert_eq!(decision.limit, 500);
    }

    #[test]
    fn test_below_detection_threshold_is_denied() {
        let config = BurstConfig {
            detection_threshold: 1.5,
            ..Default::default()
        };
        let handler = BurstHandler::new(config);
        let decision = handler.check_burst_allowance_at("c", 120, 100, &metadata("/", None), T0);
        assert_eq!(decision, BurstDecision::denied(100));
        assert!(handler.active_burst("c").is_none());
    }

    #[test]
    fn test_forced_cooldown_blocks_until_expiry() {
        let handler = handler();
        let m = metadata("/", Some(BROWSER));
        handler.force_cooldown_at("d", 300, T0);

        for offset in [0, 1_000, 150_000, 299_999] {
            let decision = handler.check_burst_allowance_at("d", 150, 100, &m, T0 + offset);
            assert_eq!(decision, BurstDecision::denied(100));
        }
        assert!(handler.active_burst("d").is_none());

        let after = handler.check_burst_allowance_at("d", 150, 100, &m, T0 + 300_000);
        assert!(after.allowed);
    }

    #[test]
    fn test_forced_cooldown_ends_active_burst() {
        let handler = handler();
        let m = metadata("/", Some(BROWSER));
        assert!(handler.check_burst_allowance_at("e", 100, 100, &m, T0).allowed);

        handler.force_cooldown_at("e", 60, T0 + 1_000);
        assert!(handler.active_burst("e").is_none());
        assert_eq!(handler.archived(10).len(), 1);
        assert!(!handler.check_burst_allowance_at("e", 100, 100, &m, T0 + 2_000).allowed);

        assert!(handler.clear_cooldown("e"));
        assert!(handler.check_burst_allowance_at("e", 100, 100, &m, T0 + 3_000).allowed);
    }

    struct AlwaysMalicious;

    impl ClassifierRule for AlwaysMalicious {
        fn name(&self) -> &str {
            "always_malicious"
        }

        fn classify(&self, _ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
            Ok(Some(BurstType::Malicious))
        }
    }

    #[test]
    fn test_repeat_offender_overrides_browser_signals() {
        let handler = handler();
        handler.add_rule(Arc::new(AlwaysMalicious));
        let unmatched = metadata("/checkout", Some("CustomClient/1.0"));
        let mut now = T0;

        // Two malicious bursts, each followed by its cooldown
        for _ in 0..2 {
            let decision = handler.check_burst_allowance_at("f", 100, 100, &unmatched, now);
            assert_eq!(decision.burst_type, BurstType::Malicious);
            assert!(decision.limit < 100);
            now += 60_000;
            handler.sweep_at(now);
            assert!(handler.is_cooling_down_at("f", now));
            now += 300_000;
            handler.sweep_at(now);
        }

        // Fill the rest of the last-10 window with ordinary bursts
        let browser = metadata("/", Some(BROWSER));
        for _ in 0..7 {
            let decision = handler.check_burst_allowance_at("f", 100, 100, &browser, now);
            assert_eq!(decision.burst_type, BurstType::Malicious);
            now += 60_000;
            handler.sweep_at(now);
            now += 300_000;
            handler.sweep_at(now);
        }

        let decision = handler.check_burst_allowance_at("f", 100, 100, &browser, now);
        assert_eq!(decision.burst_type, BurstType::Malicious);
        assert!(decision.limit < 100);
    }

    #[test]
    fn test_single_malicious_burst_is_not_repeat_offense() {
        let handler = handler();
        handler.add_rule(Arc::new(AlwaysMalicious));
        let unmatched = metadata("/checkout", Some("CustomClient/1.0"));
        let browser = metadata("/", Some(BROWSER));
        let mut now = T0;

        handler.check_burst_allowance_at("g", 100, 100, &unmatched, now);
        now += 60_000;
        handler.sweep_at(now);
        handler.clear_cooldown("g");

        for _ in 0..10 {
            let decision = handler.check_burst_allowance_at("g", 100, 100, &browser, now);
            assert_eq!(decision.burst_type, BurstType::Legitimate);
            now += 60_000;
            handler.sweep_at(now);
        }
        assert_eq!(handler.statistics().archived_bursts, 11);
    }

    #[test]
    fn test_sweep_expires_bursts_and_fires_callbacks() {
        let handler = handler();
        let ended = Arc::new(AtomicUsize::new(0));
        let ended_clone = Arc::clone(&ended);
        handler.on_burst_ended(move |_| {
            ended_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        handler.on_burst_detected(|_| anyhow::bail!("observer down"));

        let m = metadata("/", Some(BROWSER));
        assert!(handler.check_burst_allowance_at("h", 100, 100, &m, T0).allowed);

        assert_eq!(handler.sweep_at(T0 + 59_999).expired_bursts, 0);
        let report = handler.sweep_at(T0 + 60_000);
        assert_eq!(report.expired_bursts, 1);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(!handler.is_cooling_down_at("h", T0 + 60_000));
    }

    #[test]
    fn test_expired_burst_without_sweep_is_replaced() {
        let handler = handler();
        let m = metadata("/", Some(BROWSER));
        let first = handler.active_burst("i");
        assert!(first.is_none());

        handler.check_burst_allowance_at("i", 100, 100, &m, T0);
        let old_id = handler.active_burst("i").unwrap().id;
        handler.check_burst_allowance_at("i", 100, 100, &m, T0 + 61_000);

        assert_ne!(handler.active_burst("i").unwrap().id, old_id);
        assert_eq!(handler.archived(10).len(), 1);
    }

    #[test]
    fn test_release_ends_malicious_burst_without_cooldown() {
        let handler = handler();
        handler.add_rule(Arc::new(AlwaysMalicious));
        let ended = Arc::new(AtomicUsize::new(0));
        let ended_clone = Arc::clone(&ended);
        handler.on_burst_ended(move |_| {
            ended_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let m = metadata("/checkout", Some("CustomClient/1.0"));
        let decision = handler.check_burst_allowance_at("m", 100, 100, &m, T0);
        assert_eq!(decision.burst_type, BurstType::Malicious);

        handler.release("m");
        assert!(handler.active_burst("m").is_none());
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(handler.archived(10).len(), 1);

        assert_eq!(handler.sweep_at(T0 + 61_000).expired_bursts, 0);
        assert!(!handler.is_cooling_down_at("m", T0 + 61_000));
        assert!(handler.cooldown_expiry("m").is_none());
    }

    #[test]
    fn test_retune_drops_allowances_outside_archive() {
        let config = BurstConfig {
            max_history: 5,
            ..Default::default()
        };
        let handler = BurstHandler::new(config);
        let m = metadata("/", Some(BROWSER));
        let mut now = T0;

        for _ in 0..5 {
            handler.check_burst_allowance_at("old", 100, 100, &m, now);
            now += 60_000;
            handler.sweep_at(now);
        }
        handler.retune_allowances();
        assert!((handler.allowance("old") - 2.2).abs() < 1e-9);

        for _ in 0..5 {
            handler.check_burst_allowance_at("new", 100, 100, &m, now);
            now += 60_000;
            handler.sweep_at(now);
        }
        handler.retune_allowances();
        assert_eq!(handler.allowance("old"), 2.0);
        assert!((handler.allowance("new") - 2.2).abs() < 1e-9);
        assert_eq!(handler.statistics().allowance_overrides, 1);
    }

    struct Broken;

    impl ClassifierRule for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn classify(&self, _ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
            Err(ClassificationError::RuleFailed {
                rule: "broken".to_string(),
                message: "reputation feed unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_classification_error_fails_closed() {
        let config = BurstConfig::default();
        let handler = BurstHandler::with_classifier(config, BurstClassifier::new(vec![Arc::new(Broken)]));

        let decision = handler.check_burst_allowance_at("j", 150, 100, &metadata("/", None), T0);
        assert_eq!(decision, BurstDecision::denied(100));
        assert!(handler.active_burst("j").is_none());
    }

    #[test]
    fn test_disabled_handler_denies() {
        let config = BurstConfig {
            enabled: false,
            ..Default::default()
        };
        let handler = BurstHandler::new(config);
        let decision = handler.check_burst_allowance_at("k", 150, 100, &metadata("/", Some(BROWSER)), T0);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_rapid_fire_tracking() {
        let handler = handler();
        let m = metadata("/home", Some(BROWSER));
        for i in 0..21 {
            handler.track_request("l", T0 + i * 100);
        }
        let decision = handler.check_burst_allowance_at("l", 100, 100, &m, T0 + 3_000);
        assert_eq!(decision.burst_type, BurstType::Suspicious);

        handler.sweep_at(T0 + 20_000);
        assert_eq!(handler.statistics().tracked_identifiers, 0);
    }

    #[test]
    fn test_retune_allowances() {
        let handler = handler();
        let good = metadata("/", Some(BROWSER));
        let bad = metadata("/api/data", Some("scraper/1.0"));
        let mut now = T0;

        for _ in 0..5 {
            handler.check_burst_allowance_at("good", 100, 100, &good, now);
            handler.check_burst_allowance_at("bad", 100, 100, &bad, now);
            now += 60_000;
            handler.sweep_at(now);
        }

        assert_eq!(handler.retune_allowances(), 2);
        assert!((handler.allowance("good") - 2.2).abs() < 1e-9);
        assert!((handler.allowance("bad") - 1.8).abs() < 1e-9);
        assert_eq!(handler.allowance("other"), 2.0);
    }
}
