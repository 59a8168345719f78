// Iteration Driver
//
// Owns one job's run: expand the input into work units, walk them in
// order, record every outcome, settle the final status. Runs in its own
// task; a crash here fails the job, never the daemon.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::application::cancel::CancelToken;
use crate::application::executor::{ResolvedUnit, WorkUnitExecutor};
use crate::application::registry::JobRegistry;
use crate::domain::{
    CallDefaults, JobId, JobInput, ModelId, PromptId, ProviderKind, QuestionId, ResponseId,
    StoredParams, StoryId, UnitOutcome,
};
use crate::error::{AppError, Result};
use crate::port::{ModelClient, PersistenceGateway};

/// One planned work unit, still carrying row ids
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    /// Results map key: story id (standard) or prompt id (rerun)
    pub key: String,
    pub model_id: ModelId,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    pub reuse_prompt_id: Option<PromptId>,
    pub overrides: Map<String, Value>,
}

/// Expand a job input into its ordered work units
pub fn build_units(input: &JobInput) -> Vec<WorkUnit> {
    match input {
        JobInput::Standard {
            model_id,
            story_ids,
            question_id,
            params,
        } => story_ids
            .iter()
            .map(|story_id| WorkUnit {
                key: story_id.to_string(),
                model_id: *model_id,
                story_id: *story_id,
                question_id: *question_id,
                reuse_prompt_id: None,
                overrides: params.clone(),
            })
            .collect(),
        JobInput::Rerun { prompts } => prompts
            .iter()
            .map(|entry| WorkUnit {
                key: entry.prompt_id.to_string(),
                model_id: entry.model_id,
                story_id: entry.story_id,
                question_id: entry.question_id,
                reuse_prompt_id: Some(entry.prompt_id),
                overrides: entry.params.clone().unwrap_or_default(),
            })
            .collect(),
    }
}

/// Prompt sent to the provider: story text, blank line, question text
pub fn build_prompt_text(story: &str, question: &str) -> String {
    format!("{}\n\n{}", story, question)
}

enum UnitStep {
    Record(UnitOutcome),
    /// Cancelled during the inter-request delay; nothing to record
    Stop,
}

pub struct IterationDriver {
    registry: Arc<JobRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    executor: WorkUnitExecutor,
}

impl IterationDriver {
    pub fn new(
        registry: Arc<JobRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        model_client: Arc<dyn ModelClient>,
        defaults: CallDefaults,
    ) -> Self {
        let executor = WorkUnitExecutor::new(gateway.clone(), model_client, defaults);
        Self {
            registry,
            gateway,
            executor,
        }
    }

    /// Drive the job to a terminal state.
    ///
    /// The iteration itself runs in a spawned task so a panic is caught
    /// at the join point and turned into a job-level Error.
    pub async fn run(self, job_id: JobId, token: CancelToken) {
        let registry = Arc::clone(&self.registry);
        let id = job_id.clone();

        let handle = tokio::spawn(self.execute(job_id, token));
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id = %id, error = %e, "job driver failed");
                registry.fail_job(&id, e.to_string()).await;
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("job driver panicked: {}", join_error)
                } else {
                    format!("job driver aborted: {}", join_error)
                };
                error!(job_id = %id, "{}", message);
                registry.fail_job(&id, message).await;
            }
        }
    }

    async fn execute(self, job_id: JobId, mut token: CancelToken) -> Result<()> {
        let Some(job) = self.registry.view(&job_id).await else {
            warn!(job_id = %job_id, "job vanished before the driver started");
            return Ok(());
        };
        if !self.registry.mark_running(&job_id).await {
            return Ok(());
        }

        let units = build_units(&job.input);
        info!(job_id = %job_id, total = units.len(), "job running");

        let mut response_ids: Vec<ResponseId> = Vec::new();
        for (index, unit) in units.iter().enumerate() {
            // cooperative cancellation, checked at the top of every iteration
            if token.is_cancelled() {
                info!(job_id = %job_id, dispatched = index, "job cancelled, stopping");
                return Ok(());
            }
            if !self.registry.contains(&job_id).await {
                warn!(job_id = %job_id, "job evicted mid-run, stopping");
                return Ok(());
            }

            match self
                .run_unit(&job_id, index, unit, &job.run_id, &mut token)
                .await
            {
                UnitStep::Record(outcome) => {
                    if let UnitOutcome::Success { response_id } = &outcome {
                        response_ids.push(*response_id);
                    }
                    if !self
                        .registry
                        .record_unit(&job_id, unit.key.clone(), outcome)
                        .await
                    {
                        return Ok(());
                    }
                }
                UnitStep::Stop => return Ok(()),
            }
        }

        if token.is_cancelled() {
            return Ok(());
        }
        if self.registry.complete_job(&job_id, response_ids).await {
            info!(job_id = %job_id, "job completed");
        }
        Ok(())
    }

    /// One unit: resolve rows, honor the model delay, execute. Errors
    /// become a recorded failure for this unit only.
    async fn run_unit(
        &self,
        job_id: &str,
        index: usize,
        unit: &WorkUnit,
        run_id: &Option<String>,
        token: &mut CancelToken,
    ) -> UnitStep {
        let resolved = match self.resolve_unit(unit, run_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(job_id = %job_id, key = %unit.key, error = %e, "work unit failed to resolve");
                return UnitStep::Record(UnitOutcome::Failure {
                    error: failure_message(&e),
                });
            }
        };

        // the first unit dispatches immediately, the rest honor the delay
        if index > 0 && resolved.request_delay > 0.0 {
            let pause = Duration::from_secs_f64(resolved.request_delay);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = token.cancelled() => {
                    info!(job_id = %job_id, key = %unit.key, "job cancelled during request delay");
                    return UnitStep::Stop;
                }
            }
        }

        match self.executor.execute(&resolved).await {
            Ok(response_id) => UnitStep::Record(UnitOutcome::Success { response_id }),
            Err(e) => {
                warn!(job_id = %job_id, key = %unit.key, error = %e, "work unit failed");
                UnitStep::Record(UnitOutcome::Failure {
                    error: failure_message(&e),
                })
            }
        }
    }

    /// Resolve row references to real values. Rerun units re-derive
    /// story, question and parameters from the persisted prompt so the
    /// replayed call is byte-identical to the recorded one.
    async fn resolve_unit(&self, unit: &WorkUnit, run_id: &Option<String>) -> Result<ResolvedUnit> {
        let (story_id, question_id, stored) = match unit.reuse_prompt_id {
            Some(prompt_id) => {
                let prompt = self.gateway.get_prompt(prompt_id).await?;
                (
                    prompt.story_id,
                    prompt.question_id,
                    Some(StoredParams {
                        temperature: prompt.temperature,
                        max_tokens: prompt.max_tokens,
                        top_p: prompt.top_p,
                    }),
                )
            }
            None => (unit.story_id, unit.question_id, None),
        };

        let story = self.gateway.get_story(story_id).await?;
        let question = self.gateway.get_question(question_id).await?;
        let model = self.gateway.get_model(unit.model_id).await?;
        let provider: ProviderKind = model
            .provider
            .parse()
            .map_err(|e: crate::domain::UnknownProvider| AppError::Validation(e.to_string()))?;

        Ok(ResolvedUnit {
            key: unit.key.clone(),
            model_id: model.id,
            provider,
            model_name: model.name,
            request_delay: model.request_delay,
            story_id,
            question_id,
            prompt_text: build_prompt_text(&story.content, &question.content),
            overrides: unit.overrides.clone(),
            stored,
            reuse_prompt_id: unit.reuse_prompt_id,
            run_id: run_id.clone(),
        })
    }
}

/// Unit failure strings stay close to the underlying cause; the generic
/// variant prefixes would only repeat what the map key already says.
fn failure_message(err: &AppError) -> String {
    match err {
        AppError::NotFound(message) | AppError::Validation(message) => message.clone(),
        AppError::Provider(e) => e.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobStatus, RerunPrompt};
    use crate::port::gateway::mocks::MockGateway;
    use crate::port::model_client::mocks::MockModelClient;
    use crate::port::time_provider::mocks::MockClock;
    use crate::port::PromptRecord;
    use serde_json::json;

    fn seeded_gateway() -> Arc<MockGateway> {
        let gateway = Arc::new(MockGateway::new());
        gateway.insert_model(1, "gpt-4o", "openai", 0.0);
        gateway.insert_story(101, "First", "Story one text.");
        gateway.insert_story(102, "Second", "Story two text.");
        gateway.insert_question(7, "What happens next?");
        gateway
    }

    async fn start_job(
        registry: &Arc<JobRegistry>,
        clock: &MockClock,
        id: &str,
        input: JobInput,
    ) -> CancelToken {
        registry
            .insert(Job::new(id, clock.now_millis(), input, None, None))
            .await;
        match registry.admit_or_queue(id, 5, 60_000).await.unwrap() {
            crate::application::registry::StartDecision::Started(token) => token,
            _ => panic!("job should be admitted"),
        }
    }

    fn driver(
        registry: Arc<JobRegistry>,
        gateway: Arc<MockGateway>,
        client: Arc<MockModelClient>,
    ) -> IterationDriver {
        IterationDriver::new(registry, gateway, client, CallDefaults::default())
    }

    #[test]
    fn build_units_preserves_story_order() {
        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101, 102, 103],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let units = build_units(&input);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].key, "101");
        assert_eq!(units[2].story_id, 103);
        assert!(units.iter().all(|u| u.reuse_prompt_id.is_none()));
    }

    #[test]
    fn build_units_keys_reruns_by_prompt_id() {
        let input = JobInput::Rerun {
            prompts: vec![RerunPrompt {
                prompt_id: 55,
                model_id: 2,
                story_id: 101,
                question_id: 7,
                params: None,
            }],
        };
        let units = build_units(&input);
        assert_eq!(units[0].key, "55");
        assert_eq!(units[0].reuse_prompt_id, Some(55));
        assert!(units[0].overrides.is_empty());
    }

    #[test]
    fn prompt_text_joins_story_and_question() {
        assert_eq!(
            build_prompt_text("A story.", "A question?"),
            "A story.\n\nA question?"
        );
    }

    #[tokio::test]
    async fn drives_a_standard_job_to_completion() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        let client = Arc::new(MockModelClient::new_success());

        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101, 102],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway.clone(), client.clone())
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed, 2);
        assert_eq!(job.progress, 100);
        assert_eq!(job.response_ids, vec![1, 2]);
        assert!(job.results["101"].is_success());
        assert_eq!(gateway.saved_count(), 2);
        assert!(client.requests()[0].prompt.contains("Story one text."));
    }

    #[tokio::test]
    async fn a_missing_story_fails_only_its_unit() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        let client = Arc::new(MockModelClient::new_success());

        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101, 999, 102],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway.clone(), client)
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed, 3);
        assert_eq!(job.response_ids.len(), 2);
        assert_eq!(
            job.results["999"],
            UnitOutcome::Failure {
                error: "Story 999 not found".into()
            }
        );
    }

    #[tokio::test]
    async fn provider_failures_are_recorded_per_unit() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        let client = Arc::new(MockModelClient::new_fail("connection reset"));

        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway, client)
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.results["101"],
            UnitOutcome::Failure {
                error: "Request failed: connection reset".into()
            }
        );
        assert!(job.response_ids.is_empty());
    }

    #[tokio::test]
    async fn rerun_units_replay_the_stored_prompt() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        gateway.insert_prompt(PromptRecord {
            id: 42,
            model_id: 1,
            story_id: 102,
            question_id: 7,
            temperature: 0.31,
            max_tokens: 640,
            top_p: 0.85,
        });
        let client = Arc::new(MockModelClient::new_success());

        let input = JobInput::Rerun {
            prompts: vec![RerunPrompt {
                prompt_id: 42,
                model_id: 1,
                // deliberately wrong: the stored prompt must win
                story_id: 101,
                question_id: 7,
                params: None,
            }],
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway.clone(), client.clone())
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.results["42"].is_success());

        let request = &client.requests()[0];
        assert!(request.prompt.contains("Story two text."));
        assert_eq!(request.params.temperature, 0.31);
        assert_eq!(request.params.max_tokens, 640);

        let saved = gateway.saved();
        assert_eq!(saved[0].story_id, 102);
        assert_eq!(saved[0].reuse_prompt_id, Some(42));
    }

    #[tokio::test]
    async fn rerun_overrides_apply_on_top_of_stored_params() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        gateway.insert_prompt(PromptRecord {
            id: 42,
            model_id: 1,
            story_id: 101,
            question_id: 7,
            temperature: 0.31,
            max_tokens: 640,
            top_p: 0.85,
        });
        let client = Arc::new(MockModelClient::new_success());

        let mut overrides = serde_json::Map::new();
        overrides.insert("temperature".into(), json!(0.99));
        let input = JobInput::Rerun {
            prompts: vec![RerunPrompt {
                prompt_id: 42,
                model_id: 1,
                story_id: 101,
                question_id: 7,
                params: Some(overrides),
            }],
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway, client.clone())
            .run("job-1".into(), token)
            .await;

        let request = &client.requests()[0];
        assert_eq!(request.params.temperature, 0.99); // override
        assert_eq!(request.params.max_tokens, 640); // stored
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_between_units() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = Arc::new(MockGateway::new());
        // half-second delay between calls gives cancel a window
        gateway.insert_model(1, "gpt-4o", "openai", 0.5);
        gateway.insert_story(101, "First", "Story one text.");
        gateway.insert_story(102, "Second", "Story two text.");
        gateway.insert_question(7, "What happens next?");
        let client = Arc::new(MockModelClient::new_success());

        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101, 102],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        let run = tokio::spawn(
            driver(registry.clone(), gateway.clone(), client.clone()).run("job-1".into(), token),
        );

        // let the first unit finish, then cancel during the delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.cancel_job("job-1").await;
        run.await.unwrap();

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed, 1);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn a_panicking_call_fails_the_job_not_the_process() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = seeded_gateway();
        let client = Arc::new(MockModelClient::new_panic_inducing());

        let input = JobInput::Standard {
            model_id: 1,
            story_ids: vec![101],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway, client)
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn an_unknown_provider_fails_the_unit() {
        let clock = Arc::new(MockClock::new(1_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let gateway = Arc::new(MockGateway::new());
        gateway.insert_model(9, "mystery-model", "acme", 0.0);
        gateway.insert_story(101, "First", "Story one text.");
        gateway.insert_question(7, "What happens next?");
        let client = Arc::new(MockModelClient::new_success());

        let input = JobInput::Standard {
            model_id: 9,
            story_ids: vec![101],
            question_id: 7,
            params: serde_json::Map::new(),
        };
        let token = start_job(&registry, &clock, "job-1", input).await;

        driver(registry.clone(), gateway, client.clone())
            .run("job-1".into(), token)
            .await;

        let job = registry.view("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.results["101"],
            UnitOutcome::Failure {
                error: "unknown provider: acme".into()
            }
        );
        assert_eq!(client.call_count(), 0);
    }
}
