//! API layer - HTTP endpoint handlers organized by concern.

mod admin;
mod admission;
mod health;
mod metrics;
mod routes;

pub use admin::{
    add_blacklist, add_whitelist, burst_overview, delete_config, force_cooldown, get_config,
    put_config, remove_blacklist, remove_whitelist, run_learning, stats, AccessListResponse,
    BurstOverviewResponse, ConfigResponse, CooldownRequest, CooldownResponse,
};
pub use admission::admission_check;
pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::{admin_routes, protected_routes, public_routes};
