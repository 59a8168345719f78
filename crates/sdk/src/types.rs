//! Wire types for the Storybench JSON-RPC API.
//!
//! Requests serialize to the named-parameter objects the daemon expects;
//! responses deserialize from the daemon's reply payloads. The SDK keeps
//! its own copies of these shapes so client builds never depend on the
//! server crates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters for `jobs.create.v1`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest {
    pub model_id: i64,
    pub story_ids: Vec<i64>,
    pub question_id: i64,
    /// Sampling parameters forwarded to the provider (temperature, etc.).
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl CreateJobRequest {
    pub fn new(model_id: i64, story_ids: Vec<i64>, question_id: i64) -> Self {
        Self {
            model_id,
            story_ids,
            question_id,
            params: Map::new(),
            description: None,
            run_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }
}

/// One prompt to replay in a rerun job.
#[derive(Debug, Clone, Serialize)]
pub struct RerunPrompt {
    pub prompt_id: i64,
    pub model_id: i64,
    pub story_id: i64,
    pub question_id: i64,
    /// Overrides for the recorded sampling parameters. `None` reruns
    /// the prompt exactly as stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

/// Parameters for `jobs.create_rerun.v1`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRerunJobRequest {
    pub prompts: Vec<RerunPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Response from `jobs.create.v1` and `jobs.create_rerun.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: String,
}

/// Response from `jobs.start.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartJobResponse {
    pub job_id: String,
    /// `"started"` when a slot was free, `"queued"` when the job is
    /// waiting for one.
    pub outcome: String,
}

impl StartJobResponse {
    pub fn is_started(&self) -> bool {
        self.outcome == "started"
    }

    pub fn is_queued(&self) -> bool {
        self.outcome == "queued"
    }
}

/// Per-story outcome inside a job snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UnitOutcome {
    Success { response_id: i64 },
    Failure { error: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success { .. })
    }

    pub fn response_id(&self) -> Option<i64> {
        match self {
            UnitOutcome::Success { response_id } => Some(*response_id),
            UnitOutcome::Failure { .. } => None,
        }
    }
}

/// Job snapshot returned by `jobs.status.v1` and carried inside
/// watch events.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: String,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    pub total: u32,
    pub completed: u32,
    #[serde(default)]
    pub results: HashMap<String, UnitOutcome>,
    #[serde(default)]
    pub response_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    pub created_at: i64,
}

impl JobStatus {
    /// True once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "error" | "cancelled")
    }
}

/// Response from `jobs.cancel.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub status: String,
}

/// Response from `admin.stats.v1`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub total_jobs: usize,
    pub initializing_jobs: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub error_jobs: usize,
    pub cancelled_jobs: usize,
    pub uptime_seconds: i64,
}

/// One notification from a `jobs.watch.v1` subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    /// `"connected"`, `"progress"`, `"keepalive"` or `"timeout"`.
    pub event: String,
    #[serde(default)]
    pub job: Option<JobStatus>,
}
