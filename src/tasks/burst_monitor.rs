use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::metrics::StoreMetrics;
use crate::ratelimit::AdaptiveRateLimiter;
use crate::time::current_time_ms;

/// Periodic sweep of expired bursts, cooldowns and counter store entries
pub struct BurstMonitorTask {
    limiter: Arc<AdaptiveRateLimiter>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl BurstMonitorTask {
    pub fn new(
        limiter: Arc<AdaptiveRateLimiter>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            limiter,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Burst monitor started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Burst monitor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Burst monitor stopped");
    }

    async fn tick(&self) {
        let now = current_time_ms();
        self.limiter.burst_handler().sweep_at(now);

        match self.limiter.store().purge_expired(now).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(removed = removed, "Counter store entries purged");
            }
            Ok(_) => {}
            Err(e) => {
                StoreMetrics::record_error("purge");
                tracing::warn!(error = %e, "Counter store purge failed");
            }
        }
    }
}
