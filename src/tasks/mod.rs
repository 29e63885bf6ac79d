//! Background tasks owned by the rate limiter.
//!
//! Each task selects on a broadcast shutdown signal alongside its own timer,
//! so stopping never waits on a full interval.

mod burst_monitor;
mod learning;

pub use burst_monitor::BurstMonitorTask;
pub use learning::{LearningCycle, LearningTask};

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::ratelimit::AdaptiveRateLimiter;

/// Handles to the running learner and burst monitor tasks
pub struct BackgroundTasks {
    limiter: Arc<AdaptiveRateLimiter>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(limiter: Arc<AdaptiveRateLimiter>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        let monitor = BurstMonitorTask::new(
            Arc::clone(&limiter),
            limiter.monitor_interval(),
            shutdown_tx.subscribe(),
        );
        handles.push(("burst_monitor", tokio::spawn(monitor.run())));

        if limiter.learner().is_enabled() {
            let settings = limiter.learner().settings();
            let task = LearningTask::new(
                Arc::clone(limiter.learner()) as Arc<dyn LearningCycle>,
                Duration::from_secs(settings.interval_seconds.max(1)),
                Duration::from_secs(settings.retry_delay_seconds.max(1)),
                shutdown_tx.subscribe(),
            );
            handles.push(("learning", tokio::spawn(task.run())));
        } else {
            tracing::info!("Usage pattern learning disabled");
        }

        limiter.set_running(true);
        tracing::info!(tasks = handles.len(), "Rate limiter background tasks started");

        Self {
            limiter,
            shutdown_tx,
            handles,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every task to stop and wait up to `grace` in total.
    ///
    /// Tasks still running after the grace period are aborted.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(());
        let deadline = tokio::time::Instant::now() + grace;

        let mut pending: FuturesUnordered<_> = self
            .handles
            .into_iter()
            .map(|(name, mut handle)| async move {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
                    Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task failed"),
                    Err(_) => {
                        tracing::warn!(task = name, "Background task exceeded shutdown grace, aborting");
                        handle.abort();
                    }
                }
            })
            .collect();
        while pending.next().await.is_some() {}

        self.limiter.set_running(false);
        tracing::info!("Rate limiter background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::store::MemoryCounterStore;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let limiter = Arc::new(AdaptiveRateLimiter::new(
            &Settings::default(),
            Arc::new(MemoryCounterStore::new()),
        ));

        let tasks = limiter.start();
        assert_eq!(tasks.len(), 2);
        assert!(limiter.is_running());

        tokio::time::timeout(Duration::from_secs(2), tasks.shutdown(Duration::from_secs(1)))
            .await
            .expect("shutdown should finish within the grace period");
        assert!(!limiter.is_running());
    }

    #[tokio::test]
    async fn test_learning_disabled_spawns_monitor_only() {
        let mut settings = Settings::default();
        settings.learning.enabled = false;
        let limiter = Arc::new(AdaptiveRateLimiter::new(
            &settings,
            Arc::new(MemoryCounterStore::new()),
        ));

        let tasks = limiter.start();
        assert_eq!(tasks.len(), 1);
        tasks.shutdown(Duration::from_millis(500)).await;
    }
}
