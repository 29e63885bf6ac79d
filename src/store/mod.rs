//! Sliding window counter stores.
//!
//! The limiter only needs two operations from a store: count the requests an
//! identifier made inside a time range, and record a new request with a TTL
//! long enough to cover the window. Two backends are provided:
//!
//! - `MemoryCounterStore`: per-process, `DashMap` of timestamp deques
//! - `RedisCounterStore`: shared across instances, one sorted set per identifier

mod factory;
mod memory_backend;
mod redis_backend;

pub use factory::create_counter_store;
pub use memory_backend::MemoryCounterStore;
pub use redis_backend::RedisCounterStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::redis::PoolError;

/// Which backend is serving counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterBackendType {
    Memory,
    Redis,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The call did not finish within the configured bound
    #[error("Counter store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Counter store pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Counter store backend error: {0}")]
    Backend(String),
}

/// Pluggable sliding window counter.
///
/// Timestamps are Unix milliseconds. Both range bounds are inclusive.
#[async_trait]
pub trait CounterStore: Send + Sync {
    fn backend_type(&self) -> CounterBackendType;

    /// Number of requests recorded for `identifier` with `start <= ts <= end`
    async fn count_in_window(&self, identifier: &str, start: i64, end: i64)
        -> Result<u64, StoreError>;

    /// Record one request at `timestamp`, retained for at least `ttl_seconds`
    async fn record(&self, identifier: &str, timestamp: i64, ttl_seconds: u64)
        -> Result<(), StoreError>;

    /// Drop entries older than their TTL. Returns how many were removed.
    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError>;

    /// Whether the backend can currently serve requests
    fn is_connected(&self) -> bool;
}
