// Progress Channel
//
// Poll and push views over the registry. The push side runs one polling
// loop per subscriber: snapshot every tick, forward only changes, emit
// keep-alives through quiet stretches, give up at the hard cap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::application::constants::WatchConfig;
use crate::application::registry::JobRegistry;
use crate::domain::{Job, JobId, JobStatus};
use crate::error::{AppError, Result};

/// Progress stream event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    /// First event of every stream
    Connected,
    /// Progress or status changed
    Progress,
    /// Nothing changed for a while, the stream is still live
    Keepalive,
    /// Hard cap reached, the stream ends here
    Timeout,
}

/// One progress stream event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event: WatchEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

impl WatchEvent {
    pub fn connected(job: Option<Job>) -> Self {
        Self {
            event: WatchEventKind::Connected,
            job,
        }
    }

    pub fn progress(job: Job) -> Self {
        Self {
            event: WatchEventKind::Progress,
            job: Some(job),
        }
    }

    pub fn keepalive() -> Self {
        Self {
            event: WatchEventKind::Keepalive,
            job: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            event: WatchEventKind::Timeout,
            job: None,
        }
    }
}

/// Poll and push access to job progress
pub struct ProgressChannel {
    registry: Arc<JobRegistry>,
    config: WatchConfig,
}

impl ProgressChannel {
    pub fn new(registry: Arc<JobRegistry>, config: WatchConfig) -> Self {
        Self { registry, config }
    }

    /// One-shot snapshot
    pub async fn poll(&self, job_id: &str) -> Result<Job> {
        self.registry
            .view(job_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Open a progress stream for the job.
    ///
    /// The stream closes after forwarding a terminal snapshot, when the
    /// job leaves the registry, when the receiver is dropped, or at the
    /// hard duration cap.
    pub fn subscribe(&self, job_id: JobId) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(32);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        tokio::spawn(watch_loop(registry, config, job_id, tx));
        rx
    }
}

async fn watch_loop(
    registry: Arc<JobRegistry>,
    config: WatchConfig,
    job_id: JobId,
    tx: mpsc::Sender<WatchEvent>,
) {
    let deadline = Instant::now() + config.max_duration;

    let first = registry.view(&job_id).await;
    let missing = first.is_none();
    if tx.send(WatchEvent::connected(first)).await.is_err() || missing {
        return;
    }

    let mut last_seen: Option<(JobStatus, u8)> = None;
    let mut last_emit = Instant::now();
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        ticker.tick().await;

        if Instant::now() >= deadline {
            debug!(job_id = %job_id, "progress stream hit the duration cap");
            let _ = tx.send(WatchEvent::timeout()).await;
            return;
        }

        let Some(job) = registry.view(&job_id).await else {
            debug!(job_id = %job_id, "job left the registry, closing stream");
            return;
        };

        let signature = (job.status, job.progress);
        let terminal = job.status.is_terminal();

        if last_seen != Some(signature) {
            last_seen = Some(signature);
            last_emit = Instant::now();
            if tx.send(WatchEvent::progress(job)).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        } else if last_emit.elapsed() >= config.keepalive_after {
            last_emit = Instant::now();
            if tx.send(WatchEvent::keepalive()).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobInput, UnitOutcome};
    use crate::port::time_provider::mocks::MockClock;
    use std::time::Duration;

    fn fast_config() -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_millis(10),
            keepalive_after: Duration::from_millis(40),
            max_duration: Duration::from_secs(5),
        }
    }

    fn input(stories: Vec<i64>) -> JobInput {
        JobInput::Standard {
            model_id: 1,
            story_ids: stories,
            question_id: 1,
            params: serde_json::Map::new(),
        }
    }

    async fn setup(stories: Vec<i64>) -> (Arc<JobRegistry>, ProgressChannel) {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        registry
            .insert(Job::new("a", clock.now_millis(), input(stories), None, None))
            .await;
        let channel = ProgressChannel::new(registry.clone(), fast_config());
        (registry, channel)
    }

    async fn recv(
        rx: &mut mpsc::Receiver<WatchEvent>,
        what: &str,
    ) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
            .unwrap_or_else(|| panic!("stream closed waiting for {}", what))
    }

    #[tokio::test]
    async fn poll_returns_a_snapshot_or_not_found() {
        let (_registry, channel) = setup(vec![1]).await;
        let job = channel.poll("a").await.unwrap();
        assert_eq!(job.id, "a");

        let err = channel.poll("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn stream_opens_with_connected_then_reports_progress() {
        let (registry, channel) = setup(vec![1, 2]).await;
        let mut rx = channel.subscribe("a".into());

        let first = recv(&mut rx, "connected").await;
        assert_eq!(first.event, WatchEventKind::Connected);
        assert_eq!(first.job.unwrap().status, JobStatus::Initializing);

        // initial snapshot restated as a progress event
        let initial = recv(&mut rx, "initial progress").await;
        assert_eq!(initial.event, WatchEventKind::Progress);

        registry.admit_or_queue("a", 5, 60_000).await.unwrap();
        registry.mark_running("a").await;
        registry
            .record_unit("a", "1".into(), UnitOutcome::Success { response_id: 1 })
            .await;

        // a tick may catch the intermediate (Running, 0) state first
        loop {
            let event = recv(&mut rx, "running progress").await;
            if event.event == WatchEventKind::Keepalive {
                continue;
            }
            assert_eq!(event.event, WatchEventKind::Progress);
            let job = event.job.unwrap();
            assert_eq!(job.status, JobStatus::Running);
            if job.progress == 50 {
                break;
            }
        }
    }

    #[tokio::test]
    async fn stream_ends_after_a_terminal_snapshot() {
        let (registry, channel) = setup(vec![1]).await;
        let mut rx = channel.subscribe("a".into());

        recv(&mut rx, "connected").await;
        recv(&mut rx, "initial progress").await;

        registry.admit_or_queue("a", 5, 60_000).await.unwrap();
        registry.mark_running("a").await;
        registry
            .record_unit("a", "1".into(), UnitOutcome::Success { response_id: 1 })
            .await;
        registry.complete_job("a", vec![1]).await;

        // drain until the terminal snapshot arrives
        loop {
            let event = recv(&mut rx, "terminal progress").await;
            if event.event == WatchEventKind::Keepalive {
                continue;
            }
            assert_eq!(event.event, WatchEventKind::Progress);
            if event.job.as_ref().unwrap().status == JobStatus::Completed {
                break;
            }
        }
        assert!(rx.recv().await.is_none(), "stream must close after terminal");
    }

    #[tokio::test]
    async fn quiet_streams_send_keepalives() {
        let (_registry, channel) = setup(vec![1]).await;
        let mut rx = channel.subscribe("a".into());

        recv(&mut rx, "connected").await;
        recv(&mut rx, "initial progress").await;

        let event = recv(&mut rx, "keepalive").await;
        assert_eq!(event.event, WatchEventKind::Keepalive);
        assert!(event.job.is_none());
    }

    #[tokio::test]
    async fn streams_stop_at_the_duration_cap() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        registry
            .insert(Job::new("a", clock.now_millis(), input(vec![1]), None, None))
            .await;
        let channel = ProgressChannel::new(
            registry,
            WatchConfig {
                poll_interval: Duration::from_millis(10),
                keepalive_after: Duration::from_millis(20),
                max_duration: Duration::from_millis(80),
            },
        );
        let mut rx = channel.subscribe("a".into());

        let mut saw_timeout = false;
        while let Some(event) = rx.recv().await {
            if event.event == WatchEventKind::Timeout {
                saw_timeout = true;
            }
        }
        assert!(saw_timeout, "stream must end with a timeout event");
    }

    #[tokio::test]
    async fn stream_closes_when_the_job_is_gone() {
        let (registry, channel) = setup(vec![1]).await;
        let mut rx = channel.subscribe("a".into());

        recv(&mut rx, "connected").await;
        recv(&mut rx, "initial progress").await;

        registry.cancel_job("a").await;
        registry.remove_cancelled("a").await;

        // closes via the terminal snapshot or the eviction path,
        // depending on which tick lands first
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "stream must close once the job is gone");
    }

    #[tokio::test]
    async fn unknown_job_gets_connected_with_no_snapshot() {
        let (_registry, channel) = setup(vec![1]).await;
        let mut rx = channel.subscribe("ghost".into());

        let event = recv(&mut rx, "connected").await;
        assert_eq!(event.event, WatchEventKind::Connected);
        assert!(event.job.is_none());
        assert!(rx.recv().await.is_none());
    }
}
