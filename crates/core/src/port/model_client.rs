// Model Client Port
//
// One provider invocation, vendor differences hidden behind the trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CallParams, ProviderKind};

/// One provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub provider: ProviderKind,
    /// Vendor model name, e.g. "gpt-4o" or "claude-sonnet-4-0"
    pub model: String,
    /// Fully assembled prompt text
    pub prompt: String,
    pub params: CallParams,
}

/// Provider reply plus the payload that was actually sent
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    /// Extracted completion text
    pub text: String,
    /// Request body as sent, for persistence
    pub request_payload: String,
    /// Raw reply body, for persistence
    pub raw: String,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Could not connect to provider: {0}")]
    ConnectionRefused(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider returned HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    ParseError(String),

    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),
}

/// Model client interface
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

pub mod mocks {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock behavior configuration
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Reply successfully right away
        Success,
        /// Fail every call with this message
        Fail(String),
        /// Sleep, then reply successfully
        DelayThenSuccess(Duration),
        /// Panic inside the call (for crash isolation tests)
        Panic,
    }

    /// Scripted model client for unit tests
    pub struct MockModelClient {
        behavior: Arc<Mutex<MockBehavior>>,
        requests: Arc<Mutex<Vec<ProviderRequest>>>,
    }

    impl MockModelClient {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: &str) -> Self {
            Self::new(MockBehavior::Fail(message.to_string()))
        }

        pub fn new_slow(delay: Duration) -> Self {
            Self::new(MockBehavior::DelayThenSuccess(delay))
        }

        pub fn new_panic_inducing() -> Self {
            Self::new(MockBehavior::Panic)
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        /// Every request seen so far, in call order
        pub fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn reply_for(request: &ProviderRequest) -> ProviderReply {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
            "top_p": request.params.top_p,
        });
        ProviderReply {
            text: format!("mock reply from {}", request.model),
            request_payload: payload.to_string(),
            raw: json!({"text": "mock reply"}).to_string(),
        }
    }

    #[async_trait]
    impl ModelClient for MockModelClient {
        async fn call(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
            let behavior = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                self.behavior.lock().unwrap().clone()
            };
            match behavior {
                MockBehavior::Success => Ok(reply_for(&request)),
                MockBehavior::Fail(message) => Err(ProviderError::RequestFailed(message)),
                MockBehavior::DelayThenSuccess(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(reply_for(&request))
                }
                MockBehavior::Panic => panic!("mock model client panic"),
            }
        }
    }
}
