use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub ratelimit: RateLimitSettings,
    #[serde(default)]
    pub burst: BurstSettings,
    #[serde(default)]
    pub learning: LearningSettings,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

/// Process-wide rate limit defaults and counter store selection
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Whether admission control is applied at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Counter store backend: "memory" or "redis"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Redis key prefix for sliding window sets
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
    /// Requests allowed per window before the adaptive factor is applied
    #[serde(default = "default_base_limit")]
    pub base_limit: u32,
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,
    #[serde(default = "default_window_size")]
    pub window_size_seconds: u64,
    #[serde(default = "default_adaptive_factor")]
    pub adaptive_factor: f64,
    #[serde(default = "default_min_factor")]
    pub min_adaptive_factor: f64,
    #[serde(default = "default_max_factor")]
    pub max_adaptive_factor: f64,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Upper bound on a single counter store call
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    /// Capacity of the in-memory request history ring buffer
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Header carrying the client address when running behind a proxy
    #[serde(default = "default_trusted_proxy_header")]
    pub trusted_proxy_header: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BurstSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ratio of the normal limit at which a spike is evaluated as a burst
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f64,
    #[serde(default = "default_base_allowance")]
    pub base_allowance: f64,
    #[serde(default = "default_max_allowance")]
    pub max_allowance: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,
    #[serde(default = "default_burst_history")]
    pub max_history: usize,
    #[serde(default = "default_retune_window")]
    pub retune_window: usize,
    #[serde(default = "default_rapid_fire_threshold")]
    pub rapid_fire_threshold: usize,
    #[serde(default = "default_rapid_fire_window")]
    pub rapid_fire_window_seconds: u64,
    #[serde(default = "default_malicious_history_window")]
    pub malicious_history_window: usize,
    #[serde(default = "default_malicious_threshold")]
    pub malicious_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_learning_interval")]
    pub interval_seconds: u64,
    /// Delay before the next attempt after a failed cycle
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    #[serde(default = "default_slow_response")]
    pub slow_response_seconds: f64,
    #[serde(default = "default_fast_response")]
    pub fast_response_seconds: f64,
    #[serde(default = "default_high_error_rate")]
    pub high_error_rate: f64,
    #[serde(default = "default_low_error_rate")]
    pub low_error_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Required `X-API-Key` for the admin endpoints; open when unset
    pub api_key: Option<String>,
}

/// Console log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    /// `LOG__FORMAT=json` for one JSON object per event
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_redis_prefix() -> String {
    "ara:admission".to_string()
}

fn default_base_limit() -> u32 {
    100
}

fn default_burst_limit() -> u32 {
    200
}

fn default_window_size() -> u64 {
    60
}

fn default_adaptive_factor() -> f64 {
    1.0
}

fn default_min_factor() -> f64 {
    0.5
}

fn default_max_factor() -> f64 {
    2.0
}

fn default_store_timeout() -> u64 {
    250
}

fn default_history_size() -> usize {
    10_000
}

fn default_trusted_proxy_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_detection_threshold() -> f64 {
    1.0
}

fn default_base_allowance() -> f64 {
    2.0
}

fn default_max_allowance() -> f64 {
    5.0
}

fn default_cooldown() -> u64 {
    300 // 5 minutes
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_burst_history() -> usize {
    1000
}

fn default_retune_window() -> usize {
    10
}

fn default_rapid_fire_threshold() -> usize {
    20
}

fn default_rapid_fire_window() -> u64 {
    10
}

fn default_malicious_history_window() -> usize {
    10
}

fn default_malicious_threshold() -> usize {
    2
}

fn default_learning_interval() -> u64 {
    3600 // 1 hour
}

fn default_retry_delay() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_slow_response() -> f64 {
    1.0
}

fn default_fast_response() -> f64 {
    0.1
}

fn default_high_error_rate() -> f64 {
    0.1
}

fn default_low_error_rate() -> f64 {
    0.01
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-admission-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("ratelimit.backend", "memory")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RATELIMIT__BASE_LIMIT, BURST__MAX_ALLOWANCE, LEARNING__INTERVAL_SECONDS, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("ratelimit.whitelist")
                    .with_list_parse_key("ratelimit.blacklist"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            ratelimit: RateLimitSettings::default(),
            burst: BurstSettings::default(),
            learning: LearningSettings::default(),
            admin: AdminConfig::default(),
            log: LogSettings::default(),
            otel: OtelConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            redis_prefix: default_redis_prefix(),
            base_limit: default_base_limit(),
            burst_limit: default_burst_limit(),
            window_size_seconds: default_window_size(),
            adaptive_factor: default_adaptive_factor(),
            min_adaptive_factor: default_min_factor(),
            max_adaptive_factor: default_max_factor(),
            whitelist: vec![],
            blacklist: vec![],
            store_timeout_ms: default_store_timeout(),
            history_size: default_history_size(),
            trusted_proxy_header: default_trusted_proxy_header(),
        }
    }
}

impl Default for BurstSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_threshold: default_detection_threshold(),
            base_allowance: default_base_allowance(),
            max_allowance: default_max_allowance(),
            cooldown_seconds: default_cooldown(),
            monitor_interval_seconds: default_monitor_interval(),
            max_history: default_burst_history(),
            retune_window: default_retune_window(),
            rapid_fire_threshold: default_rapid_fire_threshold(),
            rapid_fire_window_seconds: default_rapid_fire_window(),
            malicious_history_window: default_malicious_history_window(),
            malicious_threshold: default_malicious_threshold(),
        }
    }
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_learning_interval(),
            retry_delay_seconds: default_retry_delay(),
            shutdown_grace_seconds: default_shutdown_grace(),
            slow_response_seconds: default_slow_response(),
            fast_response_seconds: default_fast_response(),
            high_error_rate: default_high_error_rate(),
            low_error_rate: default_low_error_rate(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
    }

    #[test]
    fn test_ratelimit_defaults() {
        let settings = RateLimitSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.backend, "memory");
        assert_eq!(settings.base_limit, 100);
        assert_eq!(settings.window_size_seconds, 60);
        assert_eq!(settings.min_adaptive_factor, 0.5);
        assert_eq!(settings.max_adaptive_factor, 2.0);
    }

    #[test]
    fn test_background_intervals() {
        let burst = BurstSettings::default();
        let learning = LearningSettings::default();
        assert_eq!(burst.monitor_interval_seconds, 30);
        assert_eq!(burst.cooldown_seconds, 300);
        assert_eq!(learning.interval_seconds, 3600);
        assert_eq!(learning.retry_delay_seconds, 60);
    }

    #[test]
    fn test_partial_section_deserialize() {
        let json = r#"{ "ratelimit": { "base_limit": 50, "whitelist": ["10.0.0.1"] } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.ratelimit.base_limit, 50);
        assert_eq!(settings.ratelimit.whitelist, vec!["10.0.0.1".to_string()]);
        assert_eq!(settings.ratelimit.burst_limit, 200);
        assert!(settings.burst.enabled);
        assert_eq!(settings.log.format, LogFormat::Text);
    }

    #[test]
    fn test_log_format_deserialize() {
        let settings: Settings = serde_json::from_str(r#"{ "log": { "format": "json" } }"#).unwrap();
        assert_eq!(settings.log.format, LogFormat::Json);
    }
}
