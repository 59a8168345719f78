//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use std::sync::Arc;

use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{PendingSubscriptionSink, SubscriptionMessage};
use jsonrpsee::types::ErrorObjectOwned;
use storybench_core::application::{
    CreateJobRequest, CreateRerunJobRequest, JobEngine, ProgressChannel, StartOutcome,
};
use storybench_core::domain::{JobStatus, RerunPrompt};
use tracing::debug;

use crate::error::{code, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    CancelJobParams, CancelJobResponse, CreateJobParams, CreateJobResponse, CreateRerunJobParams,
    JobStatusParams, JobStatusResponse, StartJobParams, StartJobResponse, StatsResponse,
    WatchEventPayload, WatchParams,
};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    engine: Arc<JobEngine>,
    progress: Arc<ProgressChannel>,
    rate_limiter: Arc<RateLimiter>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(engine: Arc<JobEngine>, progress: Arc<ProgressChannel>) -> Self {
        // Default: 200 burst, 100 req/sec (configurable via env)
        let max_burst: u32 = std::env::var("STORYBENCH_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        let rate_per_sec: u32 = std::env::var("STORYBENCH_RATE_LIMIT_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Self {
            engine,
            progress,
            rate_limiter: Arc::new(RateLimiter::new(max_burst, rate_per_sec)),
            start_time: std::time::Instant::now(),
        }
    }

    /// Rate limiting check on the mutating methods (DoS protection)
    async fn throttle(&self) -> Result<(), ErrorObjectOwned> {
        if self.rate_limiter.check().await {
            Ok(())
        } else {
            Err(ErrorObjectOwned::owned(
                code::THROTTLED,
                "Rate limit exceeded. Please slow down.",
                None::<()>,
            ))
        }
    }

    /// jobs.create.v1
    pub async fn create_job(
        &self,
        params: CreateJobParams,
    ) -> Result<CreateJobResponse, ErrorObjectOwned> {
        self.throttle().await?;

        let request = CreateJobRequest {
            model_id: params.model_id,
            story_ids: params.story_ids,
            question_id: params.question_id,
            params: params.params,
            description: params.description,
            run_id: params.run_id,
        };
        let job_id = self
            .engine
            .create_job(request)
            .await
            .map_err(to_rpc_error)?;

        Ok(CreateJobResponse {
            job_id,
            status: JobStatus::Initializing,
        })
    }

    /// jobs.create_rerun.v1
    pub async fn create_rerun_job(
        &self,
        params: CreateRerunJobParams,
    ) -> Result<CreateJobResponse, ErrorObjectOwned> {
        self.throttle().await?;

        let prompts = params
            .prompts
            .into_iter()
            .map(|p| RerunPrompt {
                prompt_id: p.prompt_id,
                model_id: p.model_id,
                story_id: p.story_id,
                question_id: p.question_id,
                params: p.params,
            })
            .collect();
        let request = CreateRerunJobRequest {
            prompts,
            description: params.description,
            run_id: params.run_id,
        };
        let job_id = self
            .engine
            .create_rerun_job(request)
            .await
            .map_err(to_rpc_error)?;

        Ok(CreateJobResponse {
            job_id,
            status: JobStatus::Initializing,
        })
    }

    /// jobs.start.v1
    pub async fn start_job(
        &self,
        params: StartJobParams,
    ) -> Result<StartJobResponse, ErrorObjectOwned> {
        self.throttle().await?;

        let outcome = self
            .engine
            .start(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        let outcome = match outcome {
            StartOutcome::Started => "started",
            StartOutcome::Queued => "queued",
        };

        Ok(StartJobResponse {
            job_id: params.job_id,
            outcome: outcome.to_string(),
        })
    }

    /// jobs.status.v1
    pub async fn job_status(
        &self,
        params: JobStatusParams,
    ) -> Result<JobStatusResponse, ErrorObjectOwned> {
        let job = self
            .engine
            .snapshot(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(JobStatusResponse::from(job))
    }

    /// jobs.cancel.v1
    pub async fn cancel_job(
        &self,
        params: CancelJobParams,
    ) -> Result<CancelJobResponse, ErrorObjectOwned> {
        self.throttle().await?;

        let status = self
            .engine
            .cancel(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(CancelJobResponse {
            job_id: params.job_id,
            status,
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let counts = self.engine.stats().await;
        Ok(StatsResponse {
            total_jobs: counts.total,
            initializing_jobs: counts.initializing,
            queued_jobs: counts.queued,
            running_jobs: counts.running,
            completed_jobs: counts.completed,
            error_jobs: counts.error,
            cancelled_jobs: counts.cancelled,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// jobs.watch.v1
    ///
    /// Rejects unknown jobs before accepting the subscription; after that
    /// the stream mirrors the progress channel until it closes or the
    /// client goes away.
    pub async fn watch(
        &self,
        params: WatchParams,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        if let Err(e) = self.progress.poll(&params.job_id).await {
            pending.reject(to_rpc_error(e)).await;
            return Ok(());
        }

        let mut events = self.progress.subscribe(params.job_id.clone());
        let sink = pending.accept().await?;
        debug!(job_id = %params.job_id, "watch subscription accepted");

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else { break };
                    let payload = WatchEventPayload::from(event);
                    let message = SubscriptionMessage::from_json(&payload)?;
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                _ = sink.closed() => break,
            }
        }

        debug!(job_id = %params.job_id, "watch subscription closed");
        Ok(())
    }
}
