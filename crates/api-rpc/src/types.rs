//! RPC Request/Response Types
//!
//! Wire-facing parameter and result shapes for the job methods.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storybench_core::application::{WatchEvent, WatchEventKind};
use storybench_core::domain::{
    Job, JobStatus, ModelId, PromptId, QuestionId, ResponseId, StoryId, UnitOutcome,
};

/// jobs.create.v1 - Register a standard job
#[derive(Debug, Deserialize)]
pub struct CreateJobParams {
    pub model_id: ModelId,
    pub story_ids: Vec<StoryId>,
    pub question_id: QuestionId,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// jobs.create_rerun.v1 - Register a rerun job
#[derive(Debug, Deserialize)]
pub struct CreateRerunJobParams {
    pub prompts: Vec<RerunPromptParams>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// One rerun entry as sent over the wire
#[derive(Debug, Deserialize)]
pub struct RerunPromptParams {
    pub prompt_id: PromptId,
    pub model_id: ModelId,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
}

/// jobs.start.v1 - Start a registered job
#[derive(Debug, Deserialize)]
pub struct StartJobParams {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartJobResponse {
    pub job_id: String,
    /// "started" or "queued"
    pub outcome: String,
}

/// jobs.status.v1 - Snapshot a job
#[derive(Debug, Deserialize)]
pub struct JobStatusParams {
    pub job_id: String,
}

/// Wire view of a job snapshot.
///
/// Registry internals (activity clock, processing flag, input echo) stay
/// server-side; response ids only show up once the job completed.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total: u32,
    pub completed: u32,
    pub results: HashMap<String, UnitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_ids: Option<Vec<ResponseId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: i64,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let response_ids = if job.status == JobStatus::Completed {
            Some(job.response_ids)
        } else {
            None
        };
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            total: job.total,
            completed: job.completed,
            results: job.results,
            response_ids,
            error: job.error,
            description: job.description,
            run_id: job.run_id,
            created_at: job.created_at,
        }
    }
}

/// jobs.cancel.v1 - Cancel a job
#[derive(Debug, Deserialize)]
pub struct CancelJobParams {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    /// Status after the cancel; terminal jobs keep theirs
    pub status: JobStatus,
}

/// admin.stats.v1 - Registry statistics
#[derive(Debug, Clone, Serialize)]
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

/// jobs.watch.v1 - Subscribe to progress events
#[derive(Debug, Deserialize)]
pub struct WatchParams {
    pub job_id: String,
}

/// One jobs.progress.v1 notification
#[derive(Debug, Clone, Serialize)]
pub struct WatchEventPayload {
    pub event: WatchEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatusResponse>,
}

impl From<WatchEvent> for WatchEventPayload {
    fn from(event: WatchEvent) -> Self {
        Self {
            event: event.event,
            job: event.job.map(JobStatusResponse::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storybench_core::domain::JobInput;

    fn job() -> Job {
        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101, 102],
            question_id: 7,
            params: Map::new(),
        };
        Job::new("j-1", 1_000, input, None, None)
    }

    #[test]
    fn status_response_hides_registry_internals() {
        let value = serde_json::to_value(JobStatusResponse::from(job())).unwrap();
        assert_eq!(value["job_id"], "j-1");
        assert_eq!(value["status"], "initializing");
        assert_eq!(value["total"], 2);
        assert!(value.get("processing").is_none());
        assert!(value.get("last_activity").is_none());
        assert!(value.get("input").is_none());
        assert!(value.get("response_ids").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn response_ids_appear_only_once_completed() {
        let mut job = job();
        job.mark_running(2_000).unwrap();
        job.record_unit(
            "101".into(),
            UnitOutcome::Success { response_id: 9 },
            2_100,
        );
        job.record_unit(
            "102".into(),
            UnitOutcome::Success { response_id: 10 },
            2_200,
        );
        job.complete(vec![9, 10], 2_300).unwrap();

        let value = serde_json::to_value(JobStatusResponse::from(job)).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["progress"], 100);
        assert_eq!(value["response_ids"], serde_json::json!([9, 10]));
        assert_eq!(value["results"]["101"]["response_id"], 9);
    }

    #[test]
    fn create_params_accept_a_minimal_payload() {
        let params: CreateJobParams =
            serde_json::from_str(r#"{"model_id": 1, "story_ids": [101], "question_id": 7}"#)
                .unwrap();
        assert_eq!(params.model_id, 1);
        assert!(params.params.is_empty());
        assert!(params.description.is_none());
        assert!(params.run_id.is_none());
    }

    #[test]
    fn watch_payload_wraps_the_snapshot() {
        let event = WatchEvent::progress(job());
        let value = serde_json::to_value(WatchEventPayload::from(event)).unwrap();
        assert_eq!(value["event"], "progress");
        assert_eq!(value["job"]["job_id"], "j-1");

        let keepalive = serde_json::to_value(WatchEventPayload::from(WatchEvent::keepalive()))
            .unwrap();
        assert_eq!(keepalive["event"], "keepalive");
        assert!(keepalive.get("job").is_none());
    }
}
