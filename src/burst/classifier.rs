//! Ordered, pluggable burst classification rules.
//!
//! Rules run in registration order and the first one that returns a type
//! wins. When none match the burst is `Unknown`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::ratelimit::RequestMetadata;

use super::types::{BurstConfig, BurstType};

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Classifier rule '{rule}' failed: {message}")]
    RuleFailed { rule: String, message: String },
}

/// Everything a rule may look at for one burst candidate
#[derive(Debug)]
pub struct BurstContext<'a> {
    pub identifier: &'a str,
    pub current_count: u64,
    pub normal_limit: u32,
    pub metadata: &'a RequestMetadata,
    /// Requests seen for this identifier inside the rapid-fire window
    pub recent_requests: usize,
    /// Archived burst types for this identifier, oldest first
    pub recent_bursts: &'a [BurstType],
}

pub trait ClassifierRule: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` passes the decision to the next rule
    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError>;
}

const BOT_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
];

const BROWSER_SIGNATURES: &[&str] = &["mozilla/", "chrome/", "safari/", "firefox/", "edg/"];

fn user_agent_lower(metadata: &RequestMetadata) -> Option<String> {
    metadata.user_agent.as_ref().map(|ua| ua.to_ascii_lowercase())
}

fn looks_like_bot(user_agent: &str) -> bool {
    BOT_SIGNATURES.iter().any(|sig| user_agent.contains(sig))
}

/// Browser user agent that does not also carry a bot signature
pub fn is_known_browser(metadata: &RequestMetadata) -> bool {
    match user_agent_lower(metadata) {
        Some(ua) => {
            BROWSER_SIGNATURES.iter().any(|sig| ua.contains(sig)) && !looks_like_bot(&ua)
        }
        None => false,
    }
}

/// Automated clients by user-agent signature
pub struct BotUserAgentRule;

impl ClassifierRule for BotUserAgentRule {
    fn name(&self) -> &str {
        "bot_user_agent"
    }

    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
        let is_bot = user_agent_lower(ctx.metadata)
            .map(|ua| looks_like_bot(&ua))
            .unwrap_or(false);
        Ok(is_bot.then_some(BurstType::Suspicious))
    }
}

/// Spikes against endpoints commonly targeted by abuse
pub struct SensitivePathRule {
    prefixes: Vec<String>,
}

impl SensitivePathRule {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SensitivePathRule {
    fn default() -> Self {
        Self::new([
            "/api/",
            "/admin/",
            "/login",
            "/search",
            "/auth/",
            "/register",
            "/password",
            "/wp-admin",
        ])
    }
}

impl ClassifierRule for SensitivePathRule {
    fn name(&self) -> &str {
        "sensitive_path"
    }

    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
        let path = ctx.metadata.path.as_str();
        let hit = self.prefixes.iter().any(|p| path.starts_with(p.as_str()));
        Ok(hit.then_some(BurstType::Suspicious))
    }
}

/// Identifiers whose recent bursts were repeatedly malicious
pub struct RepeatOffenderRule {
    window: usize,
    threshold: usize,
}

impl RepeatOffenderRule {
    pub fn new(window: usize, threshold: usize) -> Self {
        Self {
            window: window.max(1),
            threshold: threshold.max(1),
        }
    }
}

impl ClassifierRule for RepeatOffenderRule {
    fn name(&self) -> &str {
        "repeat_offender"
    }

    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
        let malicious = ctx
            .recent_bursts
            .iter()
            .rev()
            .take(self.window)
            .filter(|t| **t == BurstType::Malicious)
            .count();
        Ok((malicious >= self.threshold).then_some(BurstType::Malicious))
    }
}

/// Too many requests in the short rapid-fire window
pub struct RapidFireRule {
    threshold: usize,
}

impl RapidFireRule {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl ClassifierRule for RapidFireRule {
    fn name(&self) -> &str {
        "rapid_fire"
    }

    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
        Ok((ctx.recent_requests > self.threshold).then_some(BurstType::Suspicious))
    }
}

/// Ordinary page paths or a recognized browser
pub struct KnownGoodTrafficRule {
    paths: Vec<String>,
}

impl KnownGoodTrafficRule {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for KnownGoodTrafficRule {
    fn default() -> Self {
        Self::new(["/", "/home", "/dashboard", "/about", "/static/", "/assets/"])
    }
}

impl ClassifierRule for KnownGoodTrafficRule {
    fn name(&self) -> &str {
        "known_good_traffic"
    }

    fn classify(&self, ctx: &BurstContext<'_>) -> Result<Option<BurstType>, ClassificationError> {
        let path = ctx.metadata.path.as_str();
        let known_path = self.paths.iter().any(|p| {
            if p.ends_with('/') && p.len() > 1 {
                path.starts_with(p.as_str())
            } else {
                path == p
            }
        });

        Ok((known_path || is_known_browser(ctx.metadata)).then_some(BurstType::Legitimate))
    }
}

/// Built-in rule chain in evaluation order
pub fn default_rules(config: &BurstConfig) -> Vec<Arc<dyn ClassifierRule>> {
    vec![
        Arc::new(BotUserAgentRule),
        Arc::new(SensitivePathRule::default()),
        Arc::new(RepeatOffenderRule::new(
            config.malicious_history_window,
            config.malicious_threshold,
        )),
        Arc::new(RapidFireRule::new(config.rapid_fire_threshold)),
        Arc::new(KnownGoodTrafficRule::default()),
    ]
}

/// Upper bound on a computed confidence
pub const MAX_CONFIDENCE: f64 = 2.0;

pub struct BurstClassifier {
    rules: ArcSwap<Vec<Arc<dyn ClassifierRule>>>,
}

impl BurstClassifier {
    pub fn new(rules: Vec<Arc<dyn ClassifierRule>>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn with_default_rules(config: &BurstConfig) -> Self {
        Self::new(default_rules(config))
    }

    /// Append a rule after the existing chain
    pub fn add_rule(&self, rule: Arc<dyn ClassifierRule>) {
        self.rules.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&rule));
            next
        });
    }

    pub fn replace_rules(&self, rules: Vec<Arc<dyn ClassifierRule>>) {
        self.rules.store(Arc::new(rules));
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules
            .load()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn classify(&self, ctx: &BurstContext<'_>) -> Result<BurstType, ClassificationError> {
        let rules = self.rules.load();
        for rule in rules.iter() {
            if let Some(burst_type) = rule.classify(ctx)? {
                tracing::debug!(
                    identifier = %ctx.identifier,
                    rule = rule.name(),
                    burst_type = burst_type.as_str(),
                    "Burst classified"
                );
                return Ok(burst_type);
            }
        }
        Ok(BurstType::Unknown)
    }

    /// Base confidence for the type, x1.2 for a known browser, x1.1 with a
    /// referer, capped at `MAX_CONFIDENCE`.
    pub fn confidence(burst_type: BurstType, metadata: &RequestMetadata) -> f64 {
        let mut confidence = burst_type.base_confidence();
        if is_known_browser(metadata) {
            confidence *= 1.2;
        }
        if metadata.referer.as_deref().is_some_and(|r| !r.is_empty()) {
            confidence *= 1.1;
        }
        confidence.min(MAX_CONFIDENCE)
    }
}
