//! Counter store factory

use std::sync::Arc;

use crate::config::RateLimitSettings;
use crate::redis::RedisPool;

use super::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Create a counter store based on configuration.
///
/// - `"redis"`: `RedisCounterStore` when a pool is provided
/// - anything else: `MemoryCounterStore`
///
/// A Redis request without a pool falls back to memory so the service still
/// starts; counts are then per-instance only.
pub fn create_counter_store(
    settings: &RateLimitSettings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn CounterStore> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    "Creating Redis counter store"
                );
                Arc::new(RedisCounterStore::new(pool, settings.redis_prefix.clone()))
            } else {
                tracing::warn!(
                    "Redis counter store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryCounterStore::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory counter store");
            Arc::new(MemoryCounterStore::new())
        }
    }
}
