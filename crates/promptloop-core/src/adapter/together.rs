//! Together AI chat-completions provider.
//!
//! Sends one user message per request with `logprobs` enabled and extracts
//! per-token log-probabilities from either of the two response shapes the
//! API produces.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use super::{CompletionProvider, CompletionRequest};
use crate::config::{credential_from_env, secs_to_duration, RunConfig, MAX_DELAY_SECS};
use crate::domain::{CallResult, ConfigError, ProviderError};

/// Chat completions endpoint.
pub const TOGETHER_CHAT_URL: &str = "https://api.together.xyz/v1/chat/completions";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Together API client.
pub struct TogetherProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    url: String,
}

impl std::fmt::Debug for TogetherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TogetherProvider")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl TogetherProvider {
    /// Build a provider. A blank credential is rejected immediately.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                var: crate::config::CREDENTIAL_ENV.to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("promptloop/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.into(),
            temperature,
            url: TOGETHER_CHAT_URL.to_string(),
        })
    }

    /// Build from `TOGETHER_API_KEY` and the run configuration.
    pub fn from_env(cfg: &RunConfig) -> Result<Self, ConfigError> {
        let key = credential_from_env()?;
        Self::new(key, cfg.model.clone(), cfg.temperature)
    }

    /// Point at a different endpoint (self-hosted gateways, tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": self.temperature,
            "logprobs": true,
            "top_logprobs": 1,
        })
    }
}

#[async_trait]
impl CompletionProvider for TogetherProvider {
    async fn send(&self, request: &CompletionRequest) -> Result<CallResult, ProviderError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body, retry_after));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let result = parse_chat_response(&data)?;
        debug!(
            tokens = result.token_logprobs.len(),
            "together completion received"
        );
        Ok(result)
    }
}

/// Requests that could not be built are permanent; everything else that
/// fails before a response arrives (timeouts, resets, DNS) is transport.
fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::InvalidRequest(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds, capped at
/// [`MAX_DELAY_SECS`]. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(secs_to_duration(secs.min(MAX_DELAY_SECS)))
}

/// Map a non-success HTTP status to a provider error.
pub fn classify_status(
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited { retry_after }
    } else if status.is_server_error() {
        ProviderError::Server {
            status: status.as_u16(),
            body,
        }
    } else {
        ProviderError::Client {
            status: status.as_u16(),
            body,
        }
    }
}

/// Extract text and token log-probabilities from a chat completion body.
///
/// Log-probabilities are read from `logprobs.token_logprobs` or, failing
/// that, from `logprobs.content[*].logprob`. Absent log-probabilities yield
/// an empty list.
pub fn parse_chat_response(data: &Value) -> Result<CallResult, ProviderError> {
    let choice = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

    let text = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let logprobs = choice.get("logprobs").filter(|v| !v.is_null());
    let token_logprobs = match logprobs {
        Some(lp) => {
            if let Some(list) = lp.get("token_logprobs").and_then(Value::as_array) {
                list.iter().filter_map(Value::as_f64).collect()
            } else if let Some(content) = lp.get("content").and_then(Value::as_array) {
                content
                    .iter()
                    .filter_map(|item| item.get("logprob").and_then(Value::as_f64))
                    .collect()
            } else {
                Vec::new()
            }
        }
        None => Vec::new(),
    };

    Ok(CallResult {
        text,
        token_logprobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_logprobs_shape() {
        let data = json!({
            "choices": [{
                "message": {"content": "4"},
                "logprobs": {"token_logprobs": [-0.1, -0.2]}
            }]
        });
        let result = parse_chat_response(&data).unwrap();
        assert_eq!(result.text, "4");
        assert_eq!(result.token_logprobs, vec![-0.1, -0.2]);
    }

    #[test]
    fn test_parse_content_array_shape() {
        let data = json!({
            "choices": [{
                "message": {"content": "yes"},
                "logprobs": {"content": [
                    {"token": "y", "logprob": -0.5},
                    {"token": "es", "logprob": -0.25}
                ]}
            }]
        });
        let result = parse_chat_response(&data).unwrap();
        assert_eq!(result.token_logprobs, vec![-0.5, -0.25]);
    }

    #[test]
    fn test_parse_missing_logprobs_is_empty_not_fabricated() {
        let data = json!({"choices": [{"message": {"content": "ok"}, "logprobs": null}]});
        let result = parse_chat_response(&data).unwrap();
        assert_eq!(result.text, "ok");
        assert!(result.token_logprobs.is_empty());
    }

    #[test]
    fn test_parse_no_choices_is_malformed() {
        let err = parse_chat_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, String::new(), None);
        assert!(matches!(err, ProviderError::RateLimited { .. }));

        let err = classify_status(StatusCode::BAD_GATEWAY, "oops".to_string(), None);
        assert!(err.is_transient());

        let err = classify_status(StatusCode::UNAUTHORIZED, "bad key".to_string(), None);
        assert!(matches!(err, ProviderError::Client { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(
            parse_retry_after("1e300"),
            Some(Duration::from_secs_f64(MAX_DELAY_SECS))
        );
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_blank_key_is_configuration_error() {
        let err = TogetherProvider::new("  ", "m", 0.2).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }

    #[test]
    fn test_payload_requests_logprobs() {
        let provider = TogetherProvider::new("key", "model-x", 0.3).unwrap();
        let payload = provider.payload(&CompletionRequest {
            prompt: "hi".to_string(),
            max_tokens: 16,
        });
        assert_eq!(payload["model"], "model-x");
        assert_eq!(payload["logprobs"], true);
        assert_eq!(payload["messages"][0]["content"], "hi");
        assert_eq!(payload["max_tokens"], 16);
    }
}
