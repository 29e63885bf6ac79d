//! Cross-component integration tests
//!
//! These tests drive the limiter, burst handler, learner and background
//! tasks together without a server or Redis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ara_admission_service::burst::BurstType;
use ara_admission_service::config::Settings;
use ara_admission_service::ratelimit::{AdaptiveRateLimiter, RateLimitStatus, RequestMetadata};
use ara_admission_service::store::{CounterStore, MemoryCounterStore};

const T0: i64 = 1_700_000_000_000;

/// Create a limiter over a fresh memory store
fn create_test_environment(settings: Settings) -> (Arc<AdaptiveRateLimiter>, Arc<MemoryCounterStore>) {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = Arc::new(AdaptiveRateLimiter::new(
        &settings,
        Arc::clone(&store) as Arc<dyn CounterStore>,
    ));
    (limiter, store)
}

fn browser() -> RequestMetadata {
    RequestMetadata {
        method: "GET".to_string(),
        path: "/dashboard".to_string(),
        user_agent: Some("Mozilla/5.0 (Macintosh) Safari/605.1.15".to_string()),
        referer: Some("https://app.example.com/".to_string()),
    }
}

async fn seed(store: &MemoryCounterStore, identifier: &str, count: usize, at: i64) {
    for _ in 0..count {
        store.record(identifier, at, 60).await.unwrap();
    }
}

#[tokio::test]
async fn test_burst_lifecycle_fires_callbacks_and_archives() {
    let mut settings = Settings::default();
    settings.ratelimit.base_limit = 4;
    settings.learning.enabled = false;
    let (limiter, store) = create_test_environment(settings);

    let detected = Arc::new(Mutex::new(Vec::new()));
    let ended = Arc::new(AtomicUsize::new(0));
    {
        let detected = Arc::clone(&detected);
        limiter.burst_handler().on_burst_detected(move |event| {
            detected.lock().unwrap().push(event.burst_type);
            Ok(())
        });
        let ended = Arc::clone(&ended);
        limiter.burst_handler().on_burst_ended(move |_| {
            ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    seed(&store, "spiky", 4, T0 - 1_000).await;
    let decision = limiter.evaluate_at("spiky", &browser(), T0).await.unwrap();
    assert_eq!(decision.status, RateLimitStatus::Limited);
    assert_eq!(decision.burst_type, Some(BurstType::Legitimate));
    assert_eq!(*detected.lock().unwrap(), vec![BurstType::Legitimate]);

    // Same burst is reused while active
    let decision = limiter
        .evaluate_at("spiky", &browser(), T0 + 1_000)
        .await
        .unwrap();
    assert_eq!(decision.status, RateLimitStatus::Limited);
    assert_eq!(detected.lock().unwrap().len(), 1);

    let report = limiter.burst_handler().sweep_at(T0 + 60_001);
    assert_eq!(report.expired_bursts, 1);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.burst_handler().archived(10).len(), 1);
    assert!(limiter.burst_handler().active_burst("spiky").is_none());

    // Seeded requests have left the window
    let decision = limiter
        .evaluate_at("spiky", &browser(), T0 + 61_500)
        .await
        .unwrap();
    assert_eq!(decision.status, RateLimitStatus::Allowed);
}

#[tokio::test]
async fn test_limit_exceeded_observer_sees_blocked_decisions() {
    let mut settings = Settings::default();
    settings.ratelimit.base_limit = 1;
    settings.burst.enabled = false;
    settings.learning.enabled = false;
    let (limiter, _) = create_test_environment(settings);

    let blocked = Arc::new(AtomicUsize::new(0));
    let blocked_clone = Arc::clone(&blocked);
    limiter.on_limit_exceeded(move |decision| {
        assert_eq!(decision.status, RateLimitStatus::Blocked);
        blocked_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    limiter.on_limit_exceeded(|_| panic!("observer bug"));

    let first = limiter.evaluate_at("c", &browser(), T0).await.unwrap();
    assert_eq!(first.status, RateLimitStatus::Allowed);
    let second = limiter.evaluate_at("c", &browser(), T0 + 10).await.unwrap();
    assert_eq!(second.status, RateLimitStatus::Blocked);
    assert_eq!(second.remaining, 0);
    assert_eq!(blocked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_learning_feeds_back_into_limits() {
    let mut settings = Settings::default();
    settings.learning.enabled = true;
    let (limiter, _) = create_test_environment(settings);

    for i in 0..3 {
        let decision = limiter
            .evaluate_at("casual", &browser(), T0 + i * 60_000)
            .await
            .unwrap();
        limiter
            .annotate_response("casual", decision.timestamp, 200, 0.2)
            .await;
    }

    let report = limiter.run_learning_cycle().await.unwrap();
    assert_eq!(report.identifiers_analyzed, 1);

    let config = limiter.get_config("casual");
    assert!(config.base_limit < 100);
    assert!(config.adaptive_factor >= 0.5 && config.adaptive_factor <= 2.0);
    assert_eq!(limiter.get_config("someone-else").base_limit, 100);

    let stats = limiter.get_statistics().await;
    assert_eq!(stats.learner.cycles_completed, 1);
    assert_eq!(stats.history_size, 3);
}

#[tokio::test]
async fn test_background_tasks_start_and_stop() {
    let mut settings = Settings::default();
    settings.burst.monitor_interval_seconds = 1;
    let (limiter, _) = create_test_environment(settings);
    assert!(!limiter.is_running());

    let tasks = limiter.start();
    assert_eq!(tasks.len(), 2);
    assert!(limiter.is_running());

    tasks.shutdown(Duration::from_secs(2)).await;
    assert!(!limiter.is_running());
}
