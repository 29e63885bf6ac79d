//! Wall-clock helpers shared by the counting, burst and learning paths.

/// Current time in milliseconds since the Unix epoch
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time in whole seconds since the Unix epoch
pub fn current_time_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
