// Anthropic Adapter (Messages API)

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use storybench_core::port::{ProviderError, ProviderReply, ProviderRequest};

use crate::client::{map_send_error, read_body, ProviderConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) fn build_payload(request: &ProviderRequest) -> Value {
    // max_tokens is mandatory on this API, the other sampling knobs are not
    let mut payload = json!({
        "model": request.model,
        "max_tokens": request.params.max_tokens,
        "messages": [{"role": "user", "content": request.prompt}],
        "temperature": request.params.temperature,
        "top_p": request.params.top_p,
    });
    if let Value::Object(map) = &mut payload {
        for (key, value) in &request.params.extra {
            map.insert(key.clone(), value.clone());
        }
    }
    payload
}

pub(crate) fn extract_text(body: &Value) -> Result<String, ProviderError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::ParseError("missing content array".to_string()))?;
    let text: String = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(ProviderError::ParseError(
            "no text blocks in response content".to_string(),
        ));
    }
    Ok(text)
}

pub(crate) async fn call(
    http: &Client,
    config: &ProviderConfig,
    request: &ProviderRequest,
) -> Result<ProviderReply, ProviderError> {
    let api_key = config
        .anthropic_api_key
        .as_deref()
        .ok_or(ProviderError::MissingApiKey("anthropic"))?;
    let url = format!(
        "{}/v1/messages",
        config.anthropic_base_url.trim_end_matches('/')
    );
    let payload = build_payload(request);

    debug!(model = %request.model, "sending Anthropic messages request");
    let response = http
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&payload)
        .send()
        .await
        .map_err(|e| map_send_error(e, &url, config.timeout_secs))?;

    let raw = read_body(response).await?;
    let body: Value =
        serde_json::from_str(&raw).map_err(|e| ProviderError::ParseError(e.to_string()))?;
    let text = extract_text(&body)?;

    Ok(ProviderReply {
        text,
        request_payload: payload.to_string(),
        raw,
    })
}
