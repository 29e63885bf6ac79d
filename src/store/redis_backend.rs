//! Redis-backed sliding window counter using sorted sets.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::redis::RedisPool;

use super::{CounterBackendType, CounterStore, StoreError};

/// Adds a request and trims everything older than the TTL in one round trip.
/// KEYS[1] = window key, ARGV = timestamp ms, unique member, ttl ms
const RECORD_SCRIPT: &str = r#"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]) - tonumber(ARGV[3]))
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// Shared counter store for multi-instance deployments.
///
/// Each identifier maps to a sorted set scored by request timestamp, so
/// window counts are a single `ZCOUNT`.
pub struct RedisCounterStore {
    pool: Arc<RedisPool>,
    prefix: String,
    record_script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(pool: Arc<RedisPool>, prefix: String) -> Self {
        Self {
            pool,
            prefix,
            record_script: redis::Script::new(RECORD_SCRIPT),
        }
    }

    fn window_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend_type(&self) -> CounterBackendType {
        CounterBackendType::Redis
    }

    async fn count_in_window(
        &self,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<u64, StoreError> {
        let key = self.window_key(identifier);

        let count: u64 = self
            .pool
            .execute(|mut conn| async move { conn.zcount(key, start, end).await })
            .await?;

        Ok(count)
    }

    async fn record(
        &self,
        identifier: &str,
        timestamp: i64,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let key = self.window_key(identifier);
        // Concurrent requests in the same millisecond must stay distinct members
        let member = format!("{}-{}", timestamp, Uuid::new_v4().simple());
        let ttl_ms = ttl_seconds.max(1) * 1000;
        let script = self.record_script.clone();

        self.pool
            .execute(|mut conn| async move {
                let _: i64 = script
                    .key(key)
                    .arg(timestamp)
                    .arg(member)
                    .arg(ttl_ms)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await?;

        tracing::trace!(identifier = %identifier, timestamp = timestamp, "Recorded request in Redis window");
        Ok(())
    }

    async fn purge_expired(&self, _now: i64) -> Result<usize, StoreError> {
        // Keys expire on their own and are trimmed on every record
        Ok(0)
    }

    fn is_connected(&self) -> bool {
        self.pool.is_healthy()
    }
}
