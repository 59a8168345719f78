// OpenAI Adapter (Chat Completions API)

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use storybench_core::port::{ProviderError, ProviderReply, ProviderRequest};

use crate::client::{map_send_error, read_body, ProviderConfig};

pub(crate) fn build_payload(request: &ProviderRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "messages": [{"role": "user", "content": request.prompt}],
        "temperature": request.params.temperature,
        "max_tokens": request.params.max_tokens,
        "top_p": request.params.top_p,
    });
    // extra keys never collide with the named fields, resolution strips those
    if let Value::Object(map) = &mut payload {
        for (key, value) in &request.params.extra {
            map.insert(key.clone(), value.clone());
        }
    }
    payload
}

pub(crate) fn extract_text(body: &Value) -> Result<String, ProviderError> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::ParseError("missing choices[0].message.content".to_string())
        })
}

pub(crate) async fn call(
    http: &Client,
    config: &ProviderConfig,
    request: &ProviderRequest,
) -> Result<ProviderReply, ProviderError> {
    let api_key = config
        .openai_api_key
        .as_deref()
        .ok_or(ProviderError::MissingApiKey("openai"))?;
    let url = format!(
        "{}/v1/chat/completions",
        config.openai_base_url.trim_end_matches('/')
    );
    let payload = build_payload(request);

    debug!(model = %request.model, "sending OpenAI chat completion request");
    let response = http
        .post(&url)
        .bearer_auth(api_key)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storybench_core::domain::{CallParams, ProviderKind};

    fn request() -> ProviderRequest {
        ProviderRequest {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            prompt: "A story.\n\nA question?".to_string(),
            params: CallParams {
                temperature: 0.4,
                max_tokens: 256,
                top_p: 0.95,
                extra: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn payload_carries_model_messages_and_params() {
        let payload = build_payload(&request());
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "A story.\n\nA question?");
        assert_eq!(payload["temperature"], 0.4);
        assert_eq!(payload["max_tokens"], 256);
        assert_eq!(payload["top_p"], 0.95);
    }

    #[test]
    fn extra_params_are_forwarded_verbatim() {
        let mut request = request();
        request
            .params
            .extra
            .insert("frequency_penalty".to_string(), json!(0.5));
        let payload = build_payload(&request);
        assert_eq!(payload["frequency_penalty"], 0.5);
    }

    #[test]
    fn extracts_the_first_choice_text() {
        let body = json!({
            "id": "chatcmpl-123",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Hello there."}}
            ]
        });
        assert_eq!(extract_text(&body).unwrap(), "Hello there.");
    }

    #[test]
    fn a_reply_without_choices_is_a_parse_error() {
        let body = json!({"error": {"message": "bad request"}});
        let err = extract_text(&body).unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
    }
}
