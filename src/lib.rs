// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod time;

// Admission control
pub mod burst;
pub mod callbacks;
pub mod learning;
pub mod ratelimit;
pub mod store;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
pub mod telemetry;
