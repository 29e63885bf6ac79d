//! Redis connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

use crate::time::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthStatus {
    Healthy,
    Reconnecting,
    CircuitOpen,
}

impl RedisHealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }
}

/// Connection state plus failed counter store commands
pub struct RedisHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    reconnection_attempts: AtomicU32,
    command_failures: AtomicU64,
    last_failure: AtomicI64,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting as u8),
            last_connected: AtomicI64::new(0),
            reconnection_attempts: AtomicU32::new(0),
            command_failures: AtomicU64::new(0),
            last_failure: AtomicI64::new(0),
        }
    }

    pub fn set_connected(&self) {
        self.status
            .store(RedisHealthStatus::Healthy as u8, Ordering::Release);
        self.last_connected
            .store(current_time_ms(), Ordering::Release);
        self.reconnection_attempts.store(0, Ordering::Release);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnection_attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(current_time_ms(), Ordering::Release);
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(RedisHealthStatus::CircuitOpen as u8, Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    pub fn stats(&self) -> RedisHealthStats {
        RedisHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected.load(Ordering::Acquire),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Acquire),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            last_failure_ms: self.last_failure.load(Ordering::Acquire),
        }
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedisHealthStats {
    pub status: RedisHealthStatus,
    pub last_connected_ms: i64,
    pub reconnection_attempts: u32,
    pub command_failures: u64,
    /// Unix ms, 0 if none
    pub last_failure_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = RedisHealth::new();
        assert!(!health.is_healthy());

        health.set_reconnecting();
        health.set_reconnecting();
        assert_eq!(health.stats().reconnection_attempts, 2);

        health.set_connected();
        assert!(health.is_healthy());
        assert_eq!(health.stats().reconnection_attempts, 0);

        health.set_circuit_open();
        assert_eq!(health.status(), RedisHealthStatus::CircuitOpen);
    }

    #[test]
    fn test_command_failures_survive_reconnect() {
        let health = RedisHealth::new();
        assert_eq!(health.stats().last_failure_ms, 0);

        health.record_command_failure();
        health.record_command_failure();
        health.set_connected();

        let stats = health.stats();
        assert_eq!(stats.command_failures, 2);
        assert!(stats.last_failure_ms > 0);
        assert_eq!(stats.status, RedisHealthStatus::Healthy);
    }
}
