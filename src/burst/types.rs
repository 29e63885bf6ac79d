use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BurstSettings;
use crate::ratelimit::RequestMetadata;

/// Classification of a traffic spike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BurstType {
    Legitimate,
    Suspicious,
    Malicious,
    Unknown,
}

impl BurstType {
    pub const ALL: [BurstType; 4] = [
        BurstType::Legitimate,
        BurstType::Suspicious,
        BurstType::Malicious,
        BurstType::Unknown,
    ];

    /// Confidence before user-agent and referer adjustments
    pub fn base_confidence(self) -> f64 {
        match self {
            BurstType::Legitimate => 1.0,
            BurstType::Suspicious => 0.7,
            BurstType::Malicious => 0.3,
            BurstType::Unknown => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BurstType::Legitimate => "legitimate",
            BurstType::Suspicious => "suspicious",
            BurstType::Malicious => "malicious",
            BurstType::Unknown => "unknown",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            BurstType::Legitimate => 0,
            BurstType::Suspicious => 1,
            BurstType::Malicious => 2,
            BurstType::Unknown => 3,
        }
    }
}

/// A detected burst and the allowance granted for it
#[derive(Debug, Clone, Serialize)]
pub struct BurstEvent {
    pub id: Uuid,
    pub identifier: String,
    pub burst_type: BurstType,
    /// Window count when the burst was detected
    pub request_count: u64,
    pub normal_limit: u32,
    pub burst_limit: u32,
    pub duration_seconds: u64,
    /// Detection time, Unix milliseconds
    pub timestamp: i64,
    pub expires_at: i64,
    pub confidence: f64,
    pub metadata: RequestMetadata,
}

impl BurstEvent {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a burst allowance check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurstDecision {
    pub allowed: bool,
    /// Granted limit when allowed, otherwise the normal limit
    pub limit: u32,
    pub burst_type: BurstType,
}

impl BurstDecision {
    pub fn denied(normal_limit: u32) -> Self {
        Self {
            allowed: false,
            limit: normal_limit,
            burst_type: BurstType::Unknown,
        }
    }
}

/// Burst handler tuning
#[derive(Debug, Clone)]
pub struct BurstConfig {
    pub enabled: bool,
    /// Ratio of the normal limit a count must reach to be treated as a burst
    pub detection_threshold: f64,
    pub base_allowance: f64,
    pub max_allowance: f64,
    /// How long a granted allowance lasts
    pub burst_duration_seconds: u64,
    pub cooldown_seconds: u64,
    pub max_history: usize,
    pub retune_window: usize,
    pub rapid_fire_threshold: usize,
    pub rapid_fire_window_seconds: u64,
    pub malicious_history_window: usize,
    pub malicious_threshold: usize,
}

impl BurstConfig {
    /// Burst duration follows the default rate limit window
    pub fn from_settings(settings: &BurstSettings, window_size_seconds: u64) -> Self {
        Self {
            enabled: settings.enabled,
            detection_threshold: settings.detection_threshold,
            base_allowance: settings.base_allowance.max(1.0),
            max_allowance: settings.max_allowance.max(1.0),
            burst_duration_seconds: window_size_seconds.max(1),
            cooldown_seconds: settings.cooldown_seconds,
            max_history: settings.max_history.max(1),
            retune_window: settings.retune_window.max(1),
            rapid_fire_threshold: settings.rapid_fire_threshold,
            rapid_fire_window_seconds: settings.rapid_fire_window_seconds.max(1),
            malicious_history_window: settings.malicious_history_window.max(1),
            malicious_threshold: settings.malicious_threshold.max(1),
        }
    }
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self::from_settings(&BurstSettings::default(), 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_confidence_table() {
        assert_eq!(BurstType::Legitimate.base_confidence(), 1.0);
        assert_eq!(BurstType::Suspicious.base_confidence(), 0.7);
        assert_eq!(BurstType::Malicious.base_confidence(), 0.3);
        assert_eq!(BurstType::Unknown.base_confidence(), 0.5);
    }

    #[test]
    fn test_burst_type_serializes_uppercase() {
        let json = serde_json::to_string(&BurstType::Malicious).unwrap();
        assert_eq!(json, "\"MALICIOUS\"");
    }
}
