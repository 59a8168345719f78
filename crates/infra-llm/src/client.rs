// HTTP Model Client
//
// One reqwest client shared by both vendors; per-vendor request shaping
// and reply parsing live in the openai/anthropic modules.

use std::time::Duration;

use async_trait::async_trait;

use storybench_core::domain::ProviderKind;
use storybench_core::error::AppError;
use storybench_core::port::{ModelClient, ProviderError, ProviderReply, ProviderRequest};

use crate::{anthropic, openai};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Provider endpoint configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    /// Read configuration from the environment. STORYBENCH_* variables
    /// win over the vendors' conventional ones.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: std::env::var("STORYBENCH_OPENAI_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            anthropic_api_key: std::env::var("STORYBENCH_ANTHROPIC_API_KEY")
                .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
                .ok(),
            openai_base_url: std::env::var("STORYBENCH_OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url),
            anthropic_base_url: std::env::var("STORYBENCH_ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            timeout_secs: std::env::var("STORYBENCH_HTTP_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

/// ModelClient implementation over HTTP
pub struct HttpModelClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl HttpModelClient {
    pub fn new(config: ProviderConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn call(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        match request.provider {
            ProviderKind::OpenAi => openai::call(&self.http, &self.config, &request).await,
            ProviderKind::Anthropic => anthropic::call(&self.http, &self.config, &request).await,
        }
    }
}

/// Classify transport-level reqwest failures
pub(crate) fn map_send_error(e: reqwest::Error, url: &str, timeout_secs: u64) -> ProviderError {
    if e.is_connect() {
        ProviderError::ConnectionRefused(url.to_string())
    } else if e.is_timeout() {
        ProviderError::Timeout(timeout_secs)
    } else {
        ProviderError::RequestFailed(e.to_string())
    }
}

/// Read the reply body, mapping HTTP-level failures first
pub(crate) async fn read_body(
    response: reqwest::Response,
) -> Result<String, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::HttpError {
            status: status.as_u16(),
            message,
        });
    }
    response
        .text()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))
}
