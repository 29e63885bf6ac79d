//! Admission check endpoint for reverse proxies.
//!
//! A proxy can issue a subrequest here per client request; the admission
//! middleware has already rejected BLOCKED and blacklisted clients by the
//! time this handler runs.

use axum::{Extension, Json};

use crate::ratelimit::RateLimitDecision;

/// GET|POST /api/v1/admission - decision for the calling client
pub async fn admission_check(
    decision: Option<Extension<RateLimitDecision>>,
) -> Json<Option<RateLimitDecision>> {
    Json(decision.map(|Extension(d)| d))
}
