//! Per-identifier rate limit configuration.
//!
//! Configurations are immutable values. Every change builds a new
//! `RateLimitConfig` and publishes it with a pointer swap, so a reader always
//! sees either the old or the new value in full.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::config::RateLimitSettings;
use crate::metrics::CONFIGURED_IDENTIFIERS;

use super::AdmissionError;

/// Limits applied to one identifier (or the process default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window before the adaptive factor is applied
    pub base_limit: u32,
    pub burst_limit: u32,
    /// Sliding window length in seconds
    pub window_size: u64,
    pub adaptive_factor: f64,
    #[serde(default)]
    pub whitelist: BTreeSet<String>,
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
}

impl RateLimitConfig {
    /// Enforced limit: floor(base_limit x adaptive_factor)
    pub fn adaptive_limit(&self) -> u32 {
        (self.base_limit as f64 * self.adaptive_factor).floor() as u32
    }

    pub fn is_whitelisted(&self, identifier: &str) -> bool {
        self.whitelist.contains(identifier)
    }

    pub fn is_blacklisted(&self, identifier: &str) -> bool {
        self.blacklist.contains(identifier)
    }

    /// Window length in milliseconds
    pub fn window_ms(&self) -> i64 {
        self.window_size as i64 * 1000
    }

    /// Copy with the adaptive factor forced into `[min, max]`
    pub fn clamped(mut self, min: f64, max: f64) -> Self {
        self.adaptive_factor = clamp_factor(self.adaptive_factor, min, max);
        self
    }

    fn validate(&self) -> Result<(), AdmissionError> {
        if self.base_limit == 0 {
            return Err(AdmissionError::InvalidConfig(
                "base_limit must be greater than zero".to_string(),
            ));
        }
        if self.window_size == 0 {
            return Err(AdmissionError::InvalidConfig(
                "window_size must be greater than zero".to_string(),
            ));
        }
        if !self.adaptive_factor.is_finite() {
            return Err(AdmissionError::InvalidConfig(
                "adaptive_factor must be a finite number".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            base_limit: settings.base_limit.max(1),
            burst_limit: settings.burst_limit,
            window_size: settings.window_size_seconds.max(1),
            adaptive_factor: settings.adaptive_factor,
            whitelist: settings.whitelist.iter().cloned().collect(),
            blacklist: settings.blacklist.iter().cloned().collect(),
        }
        .clamped(settings.min_adaptive_factor, settings.max_adaptive_factor)
    }
}

/// Clamp a factor into `[min, max]`; non-finite input falls back to `min`
pub fn clamp_factor(factor: f64, min: f64, max: f64) -> f64 {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    if factor.is_nan() {
        return min;
    }
    factor.max(min).min(max)
}

/// Which list an admin change targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessList {
    Whitelist,
    Blacklist,
}

/// Config lookup with identifier-specific overrides over a shared default.
///
/// Reads are lock-free for the default and shard-locked for overrides;
/// writes only happen from the learner and admin calls.
pub struct ConfigStore {
    default: ArcSwap<RateLimitConfig>,
    overrides: DashMap<String, Arc<RateLimitConfig>>,
    /// Overrides created by the learner and never touched by an admin;
    /// only these are dropped once their identifier goes quiet
    learned_only: DashSet<String>,
    /// Base limit the learner scales from; fixed at startup
    default_base_limit: u32,
    min_factor: f64,
    max_factor: f64,
}

impl ConfigStore {
    pub fn new(default: RateLimitConfig, min_factor: f64, max_factor: f64) -> Self {
        let (min_factor, max_factor) = if min_factor <= max_factor {
            (min_factor, max_factor)
        } else {
            (max_factor, min_factor)
        };
        let default = default.clamped(min_factor, max_factor);

        Self {
            default_base_limit: default.base_limit,
            default: ArcSwap::from_pointee(default),
            overrides: DashMap::new(),
            learned_only: DashSet::new(),
            min_factor,
            max_factor,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            RateLimitConfig::from(settings),
            settings.min_adaptive_factor,
            settings.max_adaptive_factor,
        )
    }

    /// Identifier-specific config if present, otherwise the default
    pub fn resolve(&self, identifier: &str) -> Arc<RateLimitConfig> {
        match self.overrides.get(identifier) {
            Some(config) => Arc::clone(config.value()),
            None => self.default.load_full(),
        }
    }

    pub fn default_config(&self) -> Arc<RateLimitConfig> {
        self.default.load_full()
    }

    pub fn get_override(&self, identifier: &str) -> Option<Arc<RateLimitConfig>> {
        self.overrides.get(identifier).map(|c| Arc::clone(c.value()))
    }

    pub fn default_base_limit(&self) -> u32 {
        self.default_base_limit
    }

    pub fn factor_bounds(&self) -> (f64, f64) {
        (self.min_factor, self.max_factor)
    }

    /// Replace the default config wholesale
    pub fn set_default(&self, config: RateLimitConfig) -> Result<(), AdmissionError> {
        config.validate()?;
        self.default
            .store(Arc::new(config.clamped(self.min_factor, self.max_factor)));
        Ok(())
    }

    /// Replace one identifier's config wholesale
    pub fn set_config(
        &self,
        identifier: &str,
        config: RateLimitConfig,
    ) -> Result<(), AdmissionError> {
        config.validate()?;
        // Claim the identifier before publishing so a concurrent prune keeps it
        self.learned_only.remove(identifier);
        self.overrides.insert(
            identifier.to_string(),
            Arc::new(config.clamped(self.min_factor, self.max_factor)),
        );
        CONFIGURED_IDENTIFIERS.set(self.overrides.len() as i64);
        Ok(())
    }

    pub fn remove_config(&self, identifier: &str) -> bool {
        self.learned_only.remove(identifier);
        let removed = self.overrides.remove(identifier).is_some();
        CONFIGURED_IDENTIFIERS.set(self.overrides.len() as i64);
        removed
    }

    /// Whether `identifier` has an override only the learner has written
    pub fn is_learned_only(&self, identifier: &str) -> bool {
        self.learned_only.contains(identifier)
    }

    /// Drop learner-created overrides for identifiers not in `active`.
    ///
    /// Admin-set overrides are never pruned. Returns how many were dropped.
    pub fn prune_learned(&self, active: &HashSet<String>) -> usize {
        let stale: Vec<String> = self
            .learned_only
            .iter()
            .filter(|id| !active.contains(id.key()))
            .map(|id| id.key().clone())
            .collect();

        let mut pruned = 0;
        for identifier in stale {
            let removed = self
                .overrides
                .remove_if(&identifier, |id, _| self.learned_only.contains(id));
            if removed.is_some() {
                self.learned_only.remove(&identifier);
                pruned += 1;
            }
        }

        if pruned > 0 {
            CONFIGURED_IDENTIFIERS.set(self.overrides.len() as i64);
            tracing::debug!(pruned = pruned, "Stale learned configs dropped");
        }
        pruned
    }

    pub fn configured_identifiers(&self) -> usize {
        self.overrides.len()
    }

    /// Publish a learned limit for `identifier`.
    ///
    /// base = recommended, burst = 2 x recommended, factor = recommended over
    /// the process default base (clamped). Window and access lists carry over
    /// from whatever config currently applies.
    pub fn apply_learned_limit(&self, identifier: &str, recommended_limit: u32) -> Arc<RateLimitConfig> {
        let recommended_limit = recommended_limit.max(1);
        let factor = clamp_factor(
            recommended_limit as f64 / self.default_base_limit.max(1) as f64,
            self.min_factor,
            self.max_factor,
        );

        // The entry lock serializes with concurrent admin writes for this identifier
        let mut entry = self
            .overrides
            .entry(identifier.to_string())
            .or_insert_with(|| {
                self.learned_only.insert(identifier.to_string());
                self.default.load_full()
            });
        let current = Arc::clone(entry.value());
        let learned = Arc::new(RateLimitConfig {
            base_limit: recommended_limit,
            burst_limit: recommended_limit.saturating_mul(2),
            window_size: current.window_size,
            adaptive_factor: factor,
            whitelist: current.whitelist.clone(),
            blacklist: current.blacklist.clone(),
        });
        *entry.value_mut() = Arc::clone(&learned);
        drop(entry);

        CONFIGURED_IDENTIFIERS.set(self.overrides.len() as i64);
        learned
    }

    /// Add or remove `identifier` on an access list.
    ///
    /// The change is applied to the default and to the identifier's own
    /// override, which are the only configs consulted for it. Adding to one
    /// list removes it from the other.
    pub fn update_access_list(&self, identifier: &str, list: AccessList, add: bool) {
        let apply = |config: &RateLimitConfig| {
            let mut next = config.clone();
            let (target, other) = match list {
                AccessList::Whitelist => (&mut next.whitelist, &mut next.blacklist),
                AccessList::Blacklist => (&mut next.blacklist, &mut next.whitelist),
            };
            if add {
                target.insert(identifier.to_string());
                other.remove(identifier);
            } else {
                target.remove(identifier);
            }
            next
        };

        self.default.rcu(|current| apply(current));

        if let Some(mut entry) = self.overrides.get_mut(identifier) {
            let next = apply(entry.value());
            *entry.value_mut() = Arc::new(next);
        }

        tracing::info!(
            identifier = %identifier,
            list = ?list,
            added = add,
            "Access list updated"
        );
    }
}
