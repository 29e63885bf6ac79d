//! Redis connectivity for the distributed counter store.
//!
//! - `CircuitBreaker`: stops hammering Redis while it is failing
//! - `RedisHealth`: connection status for stats and metrics
//! - `pool`: shared multiplexed connection with breaker integration

mod circuit_breaker;
mod health;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};
