use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::ratelimit::{AdaptiveRateLimiter, IdentifierResolver};
use crate::redis::RedisPool;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub limiter: Arc<AdaptiveRateLimiter>,
    pub resolver: Arc<IdentifierResolver>,
    /// Present when the counter store runs on Redis
    pub redis_pool: Option<Arc<RedisPool>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        limiter: Arc<AdaptiveRateLimiter>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        let resolver = Arc::new(IdentifierResolver::new(
            &settings.ratelimit.trusted_proxy_header,
        ));

        Self {
            settings: Arc::new(settings),
            limiter,
            resolver,
            redis_pool,
            started_at: Instant::now(),
        }
    }
}
