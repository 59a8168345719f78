// In-Memory Job Registry
//
// Single source of truth for live jobs. All mutation happens behind one
// RwLock so admission checks and status flips are atomic; reads hand out
// cloned snapshots and never leak references into the map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::application::cancel::{cancel_channel, CancelHandle, CancelToken};
use crate::domain::{Job, JobId, JobStatus, ResponseId, UnitOutcome};
use crate::error::{AppError, Result};
use crate::port::TimeProvider;

struct JobEntry {
    job: Job,
    cancel: CancelHandle,
}

/// Outcome of an admission attempt
pub enum StartDecision {
    /// Slot taken; the driver runs with this token
    Started(CancelToken),
    /// Ceiling reached; the job parked in Queued
    Queued { active: usize },
}

/// Outcome of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already terminal; the existing status is preserved
    AlreadyTerminal(JobStatus),
    NotFound,
}

/// Registry status breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub initializing: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
}

/// In-memory job registry
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    clock: Arc<dyn TimeProvider>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Register a freshly created job
    pub async fn insert(&self, job: Job) {
        let (handle, _token) = cancel_channel();
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job,
                cancel: handle,
            },
        );
    }

    /// Snapshot a job. Reads count as activity and push eviction out.
    pub async fn view(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let entry = jobs.get_mut(id)?;
        entry.job.touch(now);
        Some(entry.job.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Admission check and slot claim in one atomic step.
    ///
    /// Counts jobs that are processing and were active inside the window,
    /// then either claims a slot (processing = true) or parks the job in
    /// Queued. Runs entirely under the write lock so two concurrent starts
    /// cannot both squeeze past the ceiling.
    pub async fn admit_or_queue(
        &self,
        id: &str,
        max_active: usize,
        window_millis: i64,
    ) -> Result<StartDecision> {
        let mut jobs = self.jobs.write().await;
        let now = self.now();

        let active = jobs
            .values()
            .filter(|e| e.job.processing && now - e.job.last_activity <= window_millis)
            .count();

        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

        match entry.job.status {
            JobStatus::Initializing | JobStatus::Queued => {}
            other => {
                return Err(AppError::InvalidState(format!(
                    "Job {} cannot start from status {}",
                    id, other
                )));
            }
        }

        if active >= max_active {
            if entry.job.status == JobStatus::Initializing {
                entry.job.mark_queued(now)?;
            } else {
                entry.job.touch(now);
            }
            return Ok(StartDecision::Queued { active });
        }

        entry.job.processing = true;
        entry.job.touch(now);
        Ok(StartDecision::Started(entry.cancel.subscribe()))
    }

    /// Another token for an already registered job
    pub async fn subscribe_cancel(&self, id: &str) -> Option<CancelToken> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|e| e.cancel.subscribe())
    }

    /// Driver entry: flip the job to Running. False when the job is gone
    /// or no longer startable (e.g. cancelled between admission and spawn).
    pub async fn mark_running(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        match entry.job.mark_running(now) {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %id, error = %e, "job not startable");
                false
            }
        }
    }

    /// Record one finished work unit. False when the job is gone.
    pub async fn record_unit(&self, id: &str, key: String, outcome: UnitOutcome) -> bool {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        entry.job.record_unit(key, outcome, now);
        true
    }

    /// Finish a run. No-op (false) when cancellation won the race.
    pub async fn complete_job(&self, id: &str, response_ids: Vec<ResponseId>) -> bool {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.job.complete(response_ids, now).is_err() {
            debug!(job_id = %id, status = %entry.job.status, "completion skipped");
            return false;
        }
        entry.job.processing = false;
        true
    }

    /// Mark a job failed. Terminal statuses are left untouched.
    pub async fn fail_job(&self, id: &str, message: String) -> bool {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.job.status.is_terminal() {
            return false;
        }
        entry.job.fail(message, now);
        entry.job.processing = false;
        true
    }

    /// Cancel a job: fire the token, flip the status, release the slot.
    pub async fn cancel_job(&self, id: &str) -> CancelOutcome {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let Some(entry) = jobs.get_mut(id) else {
            return CancelOutcome::NotFound;
        };
        if entry.job.status.is_terminal() {
            return CancelOutcome::AlreadyTerminal(entry.job.status);
        }
        entry.cancel.cancel();
        entry.job.cancel(now);
        entry.job.processing = false;
        CancelOutcome::Cancelled
    }

    /// Deferred removal after the cancel grace period. Only removes the
    /// job if it is still cancelled (it cannot leave that state, but it
    /// may already have been evicted).
    pub async fn remove_cancelled(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get(id) {
            Some(entry) if entry.job.status == JobStatus::Cancelled => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Evict expired jobs: terminal ones idle past the retention window,
    /// and any job idle past the hard cutoff. Evicted non-terminal jobs
    /// get their cancel token fired so a stuck driver stops dispatching.
    pub async fn sweep(&self, retention_millis: i64, cutoff_millis: i64) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let now = self.now();
        let mut evicted = Vec::new();
        jobs.retain(|id, entry| {
            let idle = now - entry.job.last_activity;
            let expired = if entry.job.status.is_terminal() {
                idle > retention_millis
            } else {
                idle > cutoff_millis
            };
            if expired {
                entry.cancel.cancel();
                evicted.push(id.clone());
            }
            !expired
        });
        evicted
    }

    pub async fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read().await;
        let mut counts = StatusCounts {
            total: jobs.len(),
            ..Default::default()
        };
        for entry in jobs.values() {
            match entry.job.status {
                JobStatus::Initializing => counts.initializing += 1,
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Error => counts.error += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}
