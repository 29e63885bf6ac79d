//! Adaptive rate limiting.
//!
//! Requests are counted per identifier in a sliding window. The enforced
//! limit is the identifier's base limit scaled by an adaptive factor that the
//! learner rewrites from observed traffic. Requests over the limit are handed
//! to the burst handler, which may grant a temporary allowance.

mod config;
mod history;
mod identity;
mod limiter;

pub use config::{clamp_factor, AccessList, ConfigStore, RateLimitConfig};
pub use history::{RequestHistory, RequestMetadata, RequestRecord};
pub use identity::{extract_metadata, is_subrequest, IdentifierResolver, UNKNOWN_IDENTIFIER};
pub use limiter::{
    AdaptiveRateLimiter, AdmissionError, LimiterStatistics, RateLimitDecision, RateLimitStatus,
};
