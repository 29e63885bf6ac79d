//! In-memory sliding window counter using DashMap.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CounterBackendType, CounterStore, StoreError};

struct WindowEntry {
    /// Request timestamps in arrival order (ms)
    timestamps: VecDeque<i64>,
    /// Retention for this identifier, the largest TTL seen (ms)
    ttl_ms: i64,
}

/// Per-process counter store.
///
/// Each identifier owns a deque of timestamps. Entries older than the TTL are
/// pruned whenever the identifier records, and globally by `purge_expired`.
pub struct MemoryCounterStore {
    windows: DashMap<String, WindowEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Number of identifiers currently tracked
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.len()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(entry: &mut WindowEntry, now: i64) -> usize {
    let cutoff = now - entry.ttl_ms;
    let before = entry.timestamps.len();
    entry.timestamps.retain(|&ts| ts >= cutoff);
    before - entry.timestamps.len()
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend_type(&self) -> CounterBackendType {
        CounterBackendType::Memory
    }

    async fn count_in_window(
        &self,
        identifier: &str,
        start: i64,
        end: i64,
    ) -> Result<u64, StoreError> {
        let count = self
            .windows
            .get(identifier)
            .map(|entry| {
                entry
                    .timestamps
                    .iter()
                    .filter(|&&ts| ts >= start && ts <= end)
                    .count() as u64
            })
            .unwrap_or(0);

        Ok(count)
    }

    async fn record(
        &self,
        identifier: &str,
        timestamp: i64,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let ttl_ms = (ttl_seconds * 1000) as i64;
        let mut entry = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| WindowEntry {
                timestamps: VecDeque::new(),
                ttl_ms,
            });

        entry.ttl_ms = entry.ttl_ms.max(ttl_ms);
        // Cheap front pruning keeps the deque bounded by the TTL
        let cutoff = timestamp - entry.ttl_ms;
        while entry.timestamps.front().is_some_and(|&ts| ts < cutoff) {
            entry.timestamps.pop_front();
        }
        entry.timestamps.push_back(timestamp);

        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut removed = 0;

        self.windows.retain(|_, entry| {
            removed += prune(entry, now);
            !entry.timestamps.is_empty()
        });

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                identifiers = self.windows.len(),
                "Purged expired window entries"
            );
        }

        Ok(removed)
    }

    fn is_connected(&self) -> bool {
        true
    }
}
