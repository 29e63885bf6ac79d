mod settings;

pub use settings::{
    AdminConfig, BurstSettings, LearningSettings, LogFormat, LogSettings, OtelConfig,
    RateLimitSettings, RedisConfig, ServerConfig, Settings,
};
