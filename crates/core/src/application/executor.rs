// Work Unit Executor
//
// One unit = resolve parameters, call the provider, persist the exchange.
// Everything the call needs arrives pre-resolved from the driver.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{
    resolve_params, CallDefaults, ModelId, PromptId, ProviderKind, QuestionId, ResponseId,
    StoredParams, StoryId,
};
use crate::error::Result;
use crate::port::{CallRecord, ModelClient, PersistenceGateway, ProviderRequest};

/// A work unit with every row reference resolved to real values
#[derive(Debug, Clone)]
pub struct ResolvedUnit {
    /// Results map key: story id (standard) or prompt id (rerun)
    pub key: String,
    pub model_id: ModelId,
    pub provider: ProviderKind,
    pub model_name: String,
    /// Seconds to pause before this model's next call
    pub request_delay: f64,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    /// Assembled prompt text sent to the provider
    pub prompt_text: String,
    /// Caller-supplied parameter overrides
    pub overrides: Map<String, Value>,
    /// Stored prompt values (rerun units only)
    pub stored: Option<StoredParams>,
    /// Rerun units attach their response to this prompt row
    pub reuse_prompt_id: Option<PromptId>,
    pub run_id: Option<String>,
}

pub struct WorkUnitExecutor {
    gateway: Arc<dyn PersistenceGateway>,
    model_client: Arc<dyn ModelClient>,
    defaults: CallDefaults,
}

impl WorkUnitExecutor {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        model_client: Arc<dyn ModelClient>,
        defaults: CallDefaults,
    ) -> Self {
        Self {
            gateway,
            model_client,
            defaults,
        }
    }

    /// Run one provider call and persist the exchange. Returns the new
    /// response id. Any error here fails this unit only.
    pub async fn execute(&self, unit: &ResolvedUnit) -> Result<ResponseId> {
        let params = resolve_params(&unit.overrides, unit.stored.as_ref(), &self.defaults)?;

        debug!(
            key = %unit.key,
            provider = %unit.provider,
            model = %unit.model_name,
            "dispatching provider call"
        );

        let reply = self
            .model_client
            .call(ProviderRequest {
                provider: unit.provider,
                model: unit.model_name.clone(),
                prompt: unit.prompt_text.clone(),
                params: params.clone(),
            })
            .await?;

        let response_id = self
            .gateway
            .save_prompt_and_response(CallRecord {
                model_id: unit.model_id,
                story_id: unit.story_id,
                question_id: unit.question_id,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                top_p: params.top_p,
                request_payload: reply.request_payload,
                response_text: reply.text,
                full_response: reply.raw,
                reuse_prompt_id: unit.reuse_prompt_id,
                run_id: unit.run_id.clone(),
            })
            .await?;

        Ok(response_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::gateway::mocks::MockGateway;
    use crate::port::model_client::mocks::MockModelClient;
    use serde_json::json;

    fn unit() -> ResolvedUnit {
        ResolvedUnit {
            key: "101".into(),
            model_id: 1,
            provider: ProviderKind::OpenAi,
            model_name: "gpt-4o".into(),
            request_delay: 0.0,
            story_id: 101,
            question_id: 7,
            prompt_text: "Once upon a time.\n\nWhat happens next?".into(),
            overrides: Map::new(),
            stored: None,
            reuse_prompt_id: None,
            run_id: Some("run-1".into()),
        }
    }

    fn executor(
        gateway: Arc<MockGateway>,
        client: Arc<MockModelClient>,
    ) -> WorkUnitExecutor {
        WorkUnitExecutor::new(gateway, client, CallDefaults::default())
    }

    #[tokio::test]
    async fn persists_the_exchange_and_returns_the_response_id() {
        let gateway = Arc::new(MockGateway::new());
        let client = Arc::new(MockModelClient::new_success());
        let executor = executor(gateway.clone(), client.clone());

        let response_id = executor.execute(&unit()).await.unwrap();
        assert_eq!(response_id, 1);

        let saved = gateway.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].story_id, 101);
        assert_eq!(saved[0].temperature, 0.7);
        assert_eq!(saved[0].max_tokens, 1024);
        assert_eq!(saved[0].run_id.as_deref(), Some("run-1"));
        assert!(saved[0].response_text.contains("gpt-4o"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn caller_overrides_reach_the_provider() {
        let gateway = Arc::new(MockGateway::new());
        let client = Arc::new(MockModelClient::new_success());
        let executor = executor(gateway.clone(), client.clone());

        let mut overridden = unit();
        overridden.overrides.insert("temperature".into(), json!(0.05));
        executor.execute(&overridden).await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.params.temperature, 0.05);
        assert_eq!(gateway.saved()[0].temperature, 0.05);
    }

    #[tokio::test]
    async fn stored_params_are_replayed_for_reruns() {
        let gateway = Arc::new(MockGateway::new());
        let client = Arc::new(MockModelClient::new_success());
        let executor = executor(gateway.clone(), client.clone());

        let mut rerun = unit();
        rerun.stored = Some(StoredParams {
            temperature: 0.33,
            max_tokens: 512,
            top_p: 0.9,
        });
        rerun.reuse_prompt_id = Some(42);
        executor.execute(&rerun).await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.params.temperature, 0.33);
        assert_eq!(request.params.max_tokens, 512);
        assert_eq!(request.params.top_p, 0.9);
        assert_eq!(gateway.saved()[0].reuse_prompt_id, Some(42));
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_an_error() {
        let gateway = Arc::new(MockGateway::new());
        let client = Arc::new(MockModelClient::new_fail("connection reset"));
        let executor = executor(gateway.clone(), client);

        let err = executor.execute(&unit()).await.unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
        assert_eq!(gateway.saved_count(), 0);
    }

    #[tokio::test]
    async fn database_failure_surfaces_as_an_error() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_saves("disk full");
        let client = Arc::new(MockModelClient::new_success());
        let executor = executor(gateway, client);

        let err = executor.execute(&unit()).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
