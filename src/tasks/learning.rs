use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::learning::{LearningError, LearningReport, UsagePatternLearner};

/// Something that can run one learning cycle on demand
#[async_trait]
pub trait LearningCycle: Send + Sync {
    async fn run_cycle(&self) -> Result<LearningReport, LearningError>;
}

#[async_trait]
impl LearningCycle for UsagePatternLearner {
    async fn run_cycle(&self) -> Result<LearningReport, LearningError> {
        UsagePatternLearner::run_cycle(self).await
    }
}

/// Periodic learning cycle.
///
/// A failed cycle is retried after `retry_delay`, then the normal interval
/// resumes. A cycle in progress is abandoned when shutdown arrives.
pub struct LearningTask {
    learner: Arc<dyn LearningCycle>,
    interval: Duration,
    retry_delay: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LearningTask {
    pub fn new(
        learner: Arc<dyn LearningCycle>,
        interval: Duration,
        retry_delay: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            learner,
            interval,
            retry_delay,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            retry_delay_secs = self.retry_delay.as_secs(),
            "Learning task started"
        );

        let mut delay = self.interval;
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Learning cycle abandoned for shutdown");
                    break;
                }
                result = self.learner.run_cycle() => result,
            };

            delay = match result {
                Ok(_) => self.interval,
                Err(LearningError::AlreadyRunning) => {
                    tracing::debug!("Learning cycle skipped, another cycle is running");
                    self.interval
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "Learning cycle failed"
                    );
                    self.retry_delay
                }
            };
        }

        tracing::info!("Learning task stopped");
    }
}
