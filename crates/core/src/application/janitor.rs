// Registry Janitor
//
// Keeps the in-memory registry from growing without bound. Runs
// opportunistically on every job creation and periodically from the
// daemon loop.

use std::sync::Arc;

use tracing::{debug, info};

use crate::application::cancel::CancelToken;
use crate::application::constants::{EngineConfig, JANITOR_SWEEP_INTERVAL};
use crate::application::registry::JobRegistry;
use crate::domain::JobId;

pub struct Janitor {
    registry: Arc<JobRegistry>,
    terminal_retention_millis: i64,
    stale_cutoff_millis: i64,
}

impl Janitor {
    pub fn new(registry: Arc<JobRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            terminal_retention_millis: config.terminal_retention.as_millis() as i64,
            stale_cutoff_millis: config.stale_job_cutoff.as_millis() as i64,
        }
    }

    /// Evict expired jobs. Returns the evicted ids.
    pub async fn sweep(&self) -> Vec<JobId> {
        let evicted = self
            .registry
            .sweep(self.terminal_retention_millis, self.stale_cutoff_millis)
            .await;
        if evicted.is_empty() {
            debug!("janitor sweep evicted nothing");
        } else {
            info!(evicted = evicted.len(), "janitor evicted expired jobs");
        }
        evicted
    }

    /// Periodic sweep loop for the daemon. Runs until shutdown.
    pub async fn run(self, mut shutdown: CancelToken) {
        let mut ticker = tokio::time::interval(JANITOR_SWEEP_INTERVAL);
        // the immediate first tick would sweep an empty registry
        ticker.tick().await;
        info!("janitor loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.cancelled() => {
                    info!("janitor loop stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cancel::cancel_channel;
    use crate::domain::{Job, JobInput};
    use crate::port::time_provider::mocks::MockClock;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            terminal_retention: Duration::from_secs(30 * 60),
            stale_job_cutoff: Duration::from_secs(2 * 60 * 60),
            ..Default::default()
        }
    }

    fn input() -> JobInput {
        JobInput::Standard {
            model_id: 1,
            story_ids: vec![1],
            question_id: 1,
            params: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn sweep_removes_expired_terminal_jobs_only() {
        let clock = Arc::new(MockClock::new(0));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let janitor = Janitor::new(registry.clone(), &config());

        registry
            .insert(Job::new("old-done", clock.now_millis(), input(), None, None))
            .await;
        registry.cancel_job("old-done").await;
        registry
            .insert(Job::new("young", clock.now_millis(), input(), None, None))
            .await;

        clock.advance(31 * 60 * 1000);
        registry.view("young").await.unwrap();

        let evicted = janitor.sweep().await;
        assert_eq!(evicted, vec!["old-done".to_string()]);
        assert!(registry.contains("young").await);
    }

    #[tokio::test]
    async fn sweep_removes_any_job_past_the_hard_cutoff() {
        let clock = Arc::new(MockClock::new(0));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let janitor = Janitor::new(registry.clone(), &config());

        registry
            .insert(Job::new("abandoned", clock.now_millis(), input(), None, None))
            .await;

        clock.advance(2 * 60 * 60 * 1000 + 1);
        let evicted = janitor.sweep().await;
        assert_eq!(evicted, vec!["abandoned".to_string()]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let clock = Arc::new(MockClock::new(0));
        let registry = Arc::new(JobRegistry::new(clock));
        let janitor = Janitor::new(registry, &config());

        let (handle, token) = cancel_channel();
        let loop_task = tokio::spawn(janitor.run(token));

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), loop_task)
            .await
            .expect("janitor loop must stop on shutdown")
            .unwrap();
    }
}
