//! Per-identifier usage analysis over a history snapshot

use std::collections::HashMap;

use chrono::{DateTime, Timelike};
use serde::Serialize;

use crate::config::LearningSettings;
use crate::ratelimit::RequestRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Bot,
    PowerUser,
    ActiveUser,
    RegularUser,
    CasualUser,
}

impl UserType {
    /// Multiplier applied to the default base limit
    pub fn weight(self) -> f64 {
        match self {
            UserType::Bot => 0.1,
            UserType::CasualUser => 0.5,
            UserType::RegularUser => 1.0,
            UserType::ActiveUser => 1.5,
            UserType::PowerUser => 2.0,
        }
    }

    /// Thresholds on volume and average spacing between requests
    pub fn classify(total_requests: usize, avg_interval_seconds: Option<f64>) -> Self {
        let interval = avg_interval_seconds.unwrap_or(f64::INFINITY);
        if total_requests > 1000 && interval < 1.0 {
            UserType::Bot
        } else if total_requests > 500 && interval < 5.0 {
            UserType::PowerUser
        } else if total_requests > 100 {
            UserType::ActiveUser
        } else if total_requests > 10 {
            UserType::RegularUser
        } else {
            UserType::CasualUser
        }
    }
}

/// Aggregates for one identifier
#[derive(Debug, Clone, Serialize)]
pub struct UsagePattern {
    pub identifier: String,
    pub total_requests: usize,
    /// Seconds, over records with a measured response time
    pub avg_response_time: Option<f64>,
    /// Share of responses with status >= 400, over records with a status
    pub error_rate: Option<f64>,
    /// Requests per UTC hour of day
    pub hourly_distribution: Vec<u64>,
    /// Up to three busiest hours, busiest first
    pub peak_hours: Vec<u32>,
    pub avg_interval_seconds: Option<f64>,
    pub user_type: UserType,
    pub recommended_limit: u32,
}

/// Inputs to the limit recommendation
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub base_limit: u32,
    pub min_factor: f64,
    pub max_factor: f64,
    pub slow_response_seconds: f64,
    pub fast_response_seconds: f64,
    pub high_error_rate: f64,
    pub low_error_rate: f64,
}

impl AnalysisParams {
    pub fn new(settings: &LearningSettings, base_limit: u32, bounds: (f64, f64)) -> Self {
        Self {
            base_limit,
            min_factor: bounds.0,
            max_factor: bounds.1,
            slow_response_seconds: settings.slow_response_seconds,
            fast_response_seconds: settings.fast_response_seconds,
            high_error_rate: settings.high_error_rate,
            low_error_rate: settings.low_error_rate,
        }
    }
}

/// Weight by user type, then response-time and error-rate adjustments,
/// clamped to the base limit scaled by the factor bounds.
///
/// Missing response data leaves the corresponding adjustment neutral.
pub fn recommend_limit(
    params: &AnalysisParams,
    user_type: UserType,
    avg_response_time: Option<f64>,
    error_rate: Option<f64>,
) -> u32 {
    let base = params.base_limit as f64;
    let mut limit = base * user_type.weight();

    match avg_response_time {
        Some(rt) if rt > params.slow_response_seconds => limit *= 0.8,
        Some(rt) if rt < params.fast_response_seconds => limit *= 1.2,
        _ => {}
    }

    match error_rate {
        Some(rate) if rate > params.high_error_rate => limit *= 0.7,
        Some(rate) if rate < params.low_error_rate => limit *= 1.1,
        _ => {}
    }

    let limit = limit.clamp(base * params.min_factor, base * params.max_factor);
    (limit.floor() as u32).max(1)
}

/// Group `records` by identifier and compute a pattern for each.
///
/// Records for one identifier are expected in append order.
pub fn analyze_history(
    records: &[RequestRecord],
    params: &AnalysisParams,
) -> HashMap<String, UsagePattern> {
    let mut grouped: HashMap<&str, Vec<&RequestRecord>> = HashMap::new();
    for record in records {
        grouped.entry(record.identifier.as_str()).or_default().push(record);
    }

    grouped
        .into_iter()
        .map(|(identifier, records)| {
            let pattern = analyze_identifier(identifier, &records, params);
            (identifier.to_string(), pattern)
        })
        .collect()
}

fn analyze_identifier(
    identifier: &str,
    records: &[&RequestRecord],
    params: &AnalysisParams,
) -> UsagePattern {
    let total_requests = records.len();

    let response_times: Vec<f64> = records.iter().filter_map(|r| r.response_time).collect();
    let avg_response_time = (!response_times.is_empty())
        .then(|| response_times.iter().sum::<f64>() / response_times.len() as f64);

    let statuses: Vec<u16> = records.iter().filter_map(|r| r.status).collect();
    let error_rate = (!statuses.is_empty()).then(|| {
        statuses.iter().filter(|s| **s >= 400).count() as f64 / statuses.len() as f64
    });

    let mut hourly = vec![0u64; 24];
    for record in records {
        if let Some(dt) = DateTime::from_timestamp_millis(record.timestamp) {
            hourly[dt.hour() as usize] += 1;
        }
    }

    let mut hours: Vec<u32> = (0..24).filter(|h| hourly[*h as usize] > 0).collect();
    hours.sort_by(|a, b| hourly[*b as usize].cmp(&hourly[*a as usize]).then(a.cmp(b)));
    hours.truncate(3);

    let avg_interval_seconds = match (records.first(), records.last()) {
        (Some(first), Some(last)) if total_requests > 1 => {
            let span_ms = (last.timestamp - first.timestamp).max(0) as f64;
            Some(span_ms / 1000.0 / (total_requests - 1) as f64)
        }
        _ => None,
    };

    let user_type = UserType::classify(total_requests, avg_interval_seconds);
    let recommended_limit = recommend_limit(params, user_type, avg_response_time, error_rate);

    UsagePattern {
        identifier: identifier.to_string(),
        total_requests,
        avg_response_time,
        error_rate,
        hourly_distribution: hourly,
        peak_hours: hours,
        avg_interval_seconds,
        user_type,
        recommended_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RequestMetadata;

    // 2023-11-14T22:13:20Z
    const T0: i64 = 1_700_000_000_000;

    fn params() -> AnalysisParams {
        AnalysisParams::new(&LearningSettings::default(), 100, (0.5, 2.0))
    }

    fn record(identifier: &str, timestamp: i64, status: Option<u16>, rt: Option<f64>) -> RequestRecord {
        let mut record = RequestRecord::new(identifier, timestamp, &RequestMetadata::default());
        record.status = status;
        record.response_time = rt;
        record
    }

    #[test]
    fn test_user_type_thresholds() {
        assert_eq!(UserType::classify(1001, Some(0.5)), UserType::Bot);
        assert_eq!(UserType::classify(1001, Some(2.0)), UserType::PowerUser);
        assert_eq!(UserType::classify(501, Some(10.0)), UserType::ActiveUser);
        assert_eq!(UserType::classify(101, None), UserType::ActiveUser);
        assert_eq!(UserType::classify(11, Some(30.0)), UserType::RegularUser);
        assert_eq!(UserType::classify(10, Some(0.1)), UserType::CasualUser);
    }

    #[test]
    fn test_recommendation_adjustments() {
        let p = params();
        assert_eq!(recommend_limit(&p, UserType::RegularUser, None, None), 100);
        assert_eq!(
            recommend_limit(&p, UserType::RegularUser, Some(2.0), Some(0.2)),
            (100.0 * 1.0 * 0.8 * 0.7_f64).floor() as u32
        );
        assert_eq!(
            recommend_limit(&p, UserType::ActiveUser, Some(0.05), Some(0.0)),
            (100.0 * 1.5 * 1.2 * 1.1_f64).floor() as u32
        );
    }

    #[test]
    fn test_recommendation_is_clamped() {
        let p = params();
        assert_eq!(recommend_limit(&p, UserType::Bot, None, None), 50);
        assert_eq!(recommend_limit(&p, UserType::PowerUser, Some(0.01), Some(0.0)), 200);
    }

    #[test]
    fn test_analyze_groups_by_identifier() {
        let mut records = Vec::new();
        for i in 0..20 {
            records.push(record("a", T0 + i * 30_000, Some(200), Some(0.2)));
        }
        records.push(record("b", T0, Some(500), Some(1.5)));
        records.push(record("b", T0 + 1_000, None, None));

        let patterns = analyze_history(&records, &params());
        assert_eq!(patterns.len(), 2);

        let a = &patterns["a"];
        assert_eq!(a.total_requests, 20);
        assert_eq!(a.user_type, UserType::RegularUser);
        assert_eq!(a.error_rate, Some(0.0));
        assert!((a.avg_interval_seconds.unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(a.hourly_distribution.iter().sum::<u64>(), 20);
        assert!(a.peak_hours.len() <= 3);

        let b = &patterns["b"];
        assert_eq!(b.error_rate, Some(1.0));
        assert_eq!(b.avg_response_time, Some(1.5));
        assert_eq!(b.user_type, UserType::CasualUser);
        assert_eq!(b.recommended_limit, 50);
    }

    #[test]
    fn test_peak_hours_ordering() {
        let hour = 3_600_000;
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(record("c", T0 + 2 * hour, None, None));
        }
        for _ in 0..5 {
            records.push(record("c", T0 + 5 * hour, None, None));
        }
        records.push(record("c", T0, None, None));
        records.push(record("c", T0 + 9 * hour, None, None));

        let pattern = &analyze_history(&records, &params())["c"];
        let busiest = DateTime::from_timestamp_millis(T0 + 5 * hour).unwrap().hour();
        let second = DateTime::from_timestamp_millis(T0 + 2 * hour).unwrap().hour();
        assert_eq!(pattern.peak_hours[0], busiest);
        assert_eq!(pattern.peak_hours[1], second);
        assert_eq!(pattern.peak_hours.len(), 3);
    }
}
