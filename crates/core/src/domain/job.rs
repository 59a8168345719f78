// Job Domain Model

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::input::JobInput;

/// Job ID (UUID v4)
pub type JobId = String;

/// Story row identifier
pub type StoryId = i64;

/// Question row identifier
pub type QuestionId = i64;

/// Model row identifier
pub type ModelId = i64;

/// Prompt row identifier
pub type PromptId = i64;

/// Response row identifier
pub type ResponseId = i64;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Initializing => write!(f, "initializing"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a single work unit.
///
/// Serializes untagged: a success is `{"response_id": N}`, a failure is
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnitOutcome {
    Success { response_id: ResponseId },
    Failure { error: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success { .. })
    }

    pub fn response_id(&self) -> Option<ResponseId> {
        match self {
            UnitOutcome::Success { response_id } => Some(*response_id),
            UnitOutcome::Failure { .. } => None,
        }
    }
}

/// Job Entity
///
/// Lives only in the in-memory registry. The persisted artifacts of a job
/// are the prompt and response rows its work units write through the
/// persistence gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,

    /// Number of work units in the batch
    pub total: u32,
    /// Work units finished so far (success or failure)
    pub completed: u32,
    /// Integer percentage, floor(completed / total * 100)
    pub progress: u8,

    /// Per-unit outcomes keyed by story id (standard) or prompt id (rerun)
    pub results: HashMap<String, UnitOutcome>,
    /// Response ids of successful units, in dispatch order
    pub response_ids: Vec<ResponseId>,
    /// Job-level failure message, set when status is Error
    pub error: Option<String>,

    pub input: JobInput,
    pub description: Option<String>,
    pub run_id: Option<String>,

    pub created_at: i64, // epoch ms
    /// Bumped on every registry touch; drives admission and eviction
    pub last_activity: i64,
    /// True from admission until the driver releases the job
    pub processing: bool,
}

impl Job {
    /// Create a new Job in the Initializing state.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `input` - Work unit source for the batch
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        input: JobInput,
        description: Option<String>,
        run_id: Option<String>,
    ) -> Self {
        let total = input.unit_count() as u32;
        Self {
            id: id.into(),
            status: JobStatus::Initializing,
            total,
            completed: 0,
            progress: 0,
            results: HashMap::new(),
            response_ids: Vec::new(),
            error: None,
            input,
            description,
            run_id,
            created_at,
            last_activity: created_at,
            processing: false,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(input: JobInput) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, input, None, None)
    }

    /// Transition Initializing -> Queued (admission rejected)
    pub fn mark_queued(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Initializing {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "queued".to_string(),
            });
        }
        self.status = JobStatus::Queued;
        self.last_activity = now_millis;
        Ok(())
    }

    /// Transition Initializing/Queued -> Running and reset the counters
    pub fn mark_running(&mut self, now_millis: i64) -> Result<()> {
        match self.status {
            JobStatus::Initializing | JobStatus::Queued => {}
            _ => {
                return Err(DomainError::InvalidStateTransition {
                    from: self.status.to_string(),
                    to: "running".to_string(),
                });
            }
        }
        self.status = JobStatus::Running;
        self.completed = 0;
        self.progress = 0;
        self.results.clear();
        self.response_ids.clear();
        self.error = None;
        self.last_activity = now_millis;
        Ok(())
    }

    /// Record one finished work unit.
    ///
    /// Unconditional: an outcome for a call that was already in flight when
    /// the job was cancelled is still recorded. The status itself never
    /// leaves a terminal state here.
    pub fn record_unit(&mut self, key: String, outcome: UnitOutcome, now_millis: i64) {
        self.results.insert(key, outcome);
        self.completed = (self.completed + 1).min(self.total);
        self.recompute_progress();
        self.last_activity = now_millis;
    }

    /// Transition Running -> Completed
    pub fn complete(&mut self, response_ids: Vec<ResponseId>, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "completed".to_string(),
            });
        }
        self.status = JobStatus::Completed;
        self.response_ids = response_ids;
        self.progress = 100;
        self.last_activity = now_millis;
        Ok(())
    }

    /// Mark as Error with a failure message.
    ///
    /// Unconditional; callers guard against overwriting terminal states.
    pub fn fail(&mut self, message: impl Into<String>, now_millis: i64) {
        self.status = JobStatus::Error;
        self.error = Some(message.into());
        self.last_activity = now_millis;
    }

    /// Mark as Cancelled.
    ///
    /// Unconditional; callers guard against overwriting terminal states.
    pub fn cancel(&mut self, now_millis: i64) {
        self.status = JobStatus::Cancelled;
        self.last_activity = now_millis;
    }

    /// Bump the activity timestamp (reads count as activity)
    pub fn touch(&mut self, now_millis: i64) {
        self.last_activity = now_millis;
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total == 0 {
            0
        } else {
            ((self.completed as u64 * 100) / self.total as u64) as u8
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::JobInput;

    fn standard_input(stories: Vec<StoryId>) -> JobInput {
        JobInput::Standard {
            model_id: 1,
            story_ids: stories,
            question_id: 7,
            params: serde_json::Map::new(),
        }
    }

    #[test]
    fn new_job_starts_initializing_with_zero_progress() {
        let job = Job::new_test(standard_input(vec![1, 2, 3]));
        assert_eq!(job.status, JobStatus::Initializing);
        assert_eq!(job.total, 3);
        assert_eq!(job.completed, 0);
        assert_eq!(job.progress, 0);
        assert!(!job.processing);
    }

    #[test]
    fn progress_is_floored_integer_percentage() {
        let mut job = Job::new_test(standard_input(vec![1, 2, 3]));
        job.mark_running(100).unwrap();

        job.record_unit("1".into(), UnitOutcome::Success { response_id: 10 }, 101);
        assert_eq!(job.progress, 33);

        job.record_unit(
            "2".into(),
            UnitOutcome::Failure {
                error: "boom".into(),
            },
            102,
        );
        assert_eq!(job.progress, 66);

        job.record_unit("3".into(), UnitOutcome::Success { response_id: 11 }, 103);
        assert_eq!(job.progress, 100);
        assert_eq!(job.completed, 3);
    }

    #[test]
    fn queued_job_can_run_but_running_cannot_queue() {
        let mut job = Job::new_test(standard_input(vec![1]));
        job.mark_queued(100).unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        job.mark_running(200).unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let err = job.mark_queued(300).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStateTransition { .. }
        ));
    }

    #[test]
    fn complete_requires_running() {
        let mut job = Job::new_test(standard_input(vec![1]));
        assert!(job.complete(vec![], 100).is_err());

        job.mark_running(100).unwrap();
        job.record_unit("1".into(), UnitOutcome::Success { response_id: 5 }, 101);
        job.complete(vec![5], 102).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.response_ids, vec![5]);
    }

    #[test]
    fn terminal_states_are_recognized() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Initializing.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Initializing).unwrap();
        assert_eq!(json, "\"initializing\"");
        let back: JobStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, JobStatus::Cancelled);
    }

    #[test]
    fn unit_outcome_serializes_untagged() {
        let ok = UnitOutcome::Success { response_id: 42 };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"response_id":42}"#);

        let failed = UnitOutcome::Failure {
            error: "Story 9 not found".into(),
        };
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"error":"Story 9 not found"}"#
        );

        let parsed: UnitOutcome = serde_json::from_str(r#"{"response_id":7}"#).unwrap();
        assert_eq!(parsed, UnitOutcome::Success { response_id: 7 });
    }
}
