// Job Engine
//
// The application facade: create, start, observe, cancel. Owns the
// admission policy and hands each admitted job to an iteration driver
// on its own task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::application::admission::AdmissionGate;
use crate::application::constants::EngineConfig;
use crate::application::driver::IterationDriver;
use crate::application::janitor::Janitor;
use crate::application::registry::{CancelOutcome, JobRegistry, StartDecision, StatusCounts};
use crate::domain::{
    CallDefaults, Job, JobId, JobInput, JobStatus, ModelId, QuestionId, RerunPrompt, StoryId,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, ModelClient, PersistenceGateway, TimeProvider};

/// Parameters for a standard job: one unit per story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
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

/// Parameters for a rerun job: one unit per stored prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRerunJobRequest {
    pub prompts: Vec<RerunPrompt>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// What `start` did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Admitted; a driver task is running it
    Started,
    /// Ceiling reached; parked in Queued for the caller to retry
    Queued,
}

pub struct JobEngine {
    registry: Arc<JobRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    model_client: Arc<dyn ModelClient>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    admission: AdmissionGate,
    janitor: Janitor,
    config: EngineConfig,
    defaults: CallDefaults,
}

impl JobEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        model_client: Arc<dyn ModelClient>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn TimeProvider>,
        config: EngineConfig,
    ) -> Self {
        let admission = AdmissionGate::new(&config);
        let janitor = Janitor::new(Arc::clone(&registry), &config);
        Self {
            registry,
            gateway,
            model_client,
            ids,
            clock,
            admission,
            janitor,
            config,
            defaults: CallDefaults::default(),
        }
    }

    /// Register a standard job. Row references are resolved lazily at
    /// run time, so a bad story id fails its unit, not the creation.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<JobId> {
        if request.story_ids.is_empty() {
            return Err(AppError::Validation(
                "story_ids must not be empty".to_string(),
            ));
        }
        let stories = request.story_ids.len();
        let input = JobInput::Standard {
            model_id: request.model_id,
            story_ids: request.story_ids,
            question_id: request.question_id,
            params: request.params,
        };
        let id = self
            .register(input, request.description, request.run_id)
            .await;
        info!(job_id = %id, stories, "job created");
        Ok(id)
    }

    /// Register a rerun job from previously persisted prompts
    pub async fn create_rerun_job(&self, request: CreateRerunJobRequest) -> Result<JobId> {
        if request.prompts.is_empty() {
            return Err(AppError::Validation(
                "prompts must not be empty".to_string(),
            ));
        }
        let prompts = request.prompts.len();
        let input = JobInput::Rerun {
            prompts: request.prompts,
        };
        let id = self
            .register(input, request.description, request.run_id)
            .await;
        info!(job_id = %id, prompts, "rerun job created");
        Ok(id)
    }

    async fn register(
        &self,
        input: JobInput,
        description: Option<String>,
        run_id: Option<String>,
    ) -> JobId {
        // every creation doubles as a cleanup opportunity
        self.janitor.sweep().await;

        let id = self.ids.generate_id();
        let job = Job::new(
            id.clone(),
            self.clock.now_millis(),
            input,
            description,
            run_id,
        );
        self.registry.insert(job).await;
        id
    }

    /// Try to start a job. Under the ceiling the driver is spawned and
    /// `Started` returned; at the ceiling the job parks in Queued and
    /// the caller retries later.
    pub async fn start(&self, job_id: &str) -> Result<StartOutcome> {
        match self.admission.try_start(&self.registry, job_id).await? {
            StartDecision::Started(token) => {
                let driver = IterationDriver::new(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.model_client),
                    self.defaults.clone(),
                );
                tokio::spawn(driver.run(job_id.to_string(), token));
                info!(job_id = %job_id, "job started");
                Ok(StartOutcome::Started)
            }
            StartDecision::Queued { active } => {
                info!(job_id = %job_id, active, "job queued, active ceiling reached");
                Ok(StartOutcome::Queued)
            }
        }
    }

    /// Current snapshot of a job
    pub async fn snapshot(&self, job_id: &str) -> Result<Job> {
        self.registry
            .view(job_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Cancel a job. Terminal jobs are left as they are and their status
    /// is returned, so repeated cancels are harmless.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        match self.registry.cancel_job(job_id).await {
            CancelOutcome::Cancelled => {
                info!(job_id = %job_id, "job cancelled");
                let registry = Arc::clone(&self.registry);
                let id = job_id.to_string();
                let grace = self.config.cancel_removal_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if registry.remove_cancelled(&id).await {
                        debug!(job_id = %id, "cancelled job removed after grace period");
                    }
                });
                Ok(JobStatus::Cancelled)
            }
            CancelOutcome::AlreadyTerminal(status) => {
                debug!(job_id = %job_id, status = %status, "cancel on terminal job ignored");
                Ok(status)
            }
            CancelOutcome::NotFound => {
                Err(AppError::NotFound(format!("Job {} not found", job_id)))
            }
        }
    }

    /// Registry status breakdown
    pub async fn stats(&self) -> StatusCounts {
        self.registry.counts().await
    }
}
