//! Call adapter: text completion with per-token log-probabilities.
//!
//! Two seams:
//! - [`CompletionProvider`] performs exactly one raw request.
//! - [`Completer`] is what the optimizer and mutators depend on.
//!   [`CallAdapter`] implements it by wrapping a provider with the
//!   [`RetryPolicy`].
//!
//! The adapter never fabricates text or log-probabilities: a failed call is
//! an [`AdapterError`] and an empty log-probability list is passed through
//! unchanged.

pub mod backoff;
pub mod together;

use std::sync::Arc;

use async_trait::async_trait;

use crate::counters::RunCounters;
use crate::domain::{AdapterError, CallResult, EvaluationCase, ProviderError};
use crate::obs;

pub use backoff::RetryPolicy;
pub use together::TogetherProvider;

/// A single rendered request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// One raw provider attempt, no retries.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<CallResult, ProviderError>;
}

/// Completion capability consumed by the optimizer and the mutators.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete already-rendered text.
    async fn generate(&self, text: &str, max_tokens: u32) -> Result<CallResult, AdapterError>;

    /// Complete `prompt` applied to one evaluation case.
    async fn complete(
        &self,
        prompt: &str,
        case: &EvaluationCase,
        max_tokens: u32,
    ) -> Result<CallResult, AdapterError> {
        self.generate(&render_prompt(prompt, case), max_tokens).await
    }
}

/// Render the instruction and case query into the text sent to the model.
pub fn render_prompt(prompt: &str, case: &EvaluationCase) -> String {
    format!(
        "{}\n\nTask:\n{}\nReturn only the answer.",
        prompt, case.query
    )
}

/// Retrying adapter over a [`CompletionProvider`].
pub struct CallAdapter {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
    counters: Arc<RunCounters>,
}

impl CallAdapter {
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            counters: Arc::new(RunCounters::new()),
        }
    }

    /// Share a counter set with the rest of the run.
    pub fn with_counters(mut self, counters: Arc<RunCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }
}

#[async_trait]
impl Completer for CallAdapter {
    async fn generate(&self, text: &str, max_tokens: u32) -> Result<CallResult, AdapterError> {
        let request = CompletionRequest {
            prompt: text.to_string(),
            max_tokens,
        };
        let max_attempts = self.policy.max_attempts();
        let mut retries = 0u32;

        loop {
            self.counters.inc_provider_calls();
            match self.provider.send(&request).await {
                Ok(result) => {
                    if result.token_logprobs.is_empty() {
                        tracing::warn!("provider returned no token log-probabilities");
                    }
                    return Ok(result);
                }
                Err(err) if err.is_transient() && retries < self.policy.max_retries => {
                    let delay = match err.retry_after() {
                        Some(hint) => self.policy.delay_for(retries).max(hint),
                        None => self.policy.delay_for(retries),
                    };
                    retries += 1;
                    self.counters.inc_retries();
                    obs::emit_provider_retry(retries, max_attempts, delay, &err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(AdapterError::RetriesExhausted {
                        attempts: retries + 1,
                        last: err,
                    });
                }
                Err(err) => return Err(AdapterError::NonRetryable(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_layout() {
        let case = EvaluationCase::new("What is 2+2?");
        let rendered = render_prompt("Answer exactly.", &case);
        assert_eq!(
            rendered,
            "Answer exactly.\n\nTask:\nWhat is 2+2?\nReturn only the answer."
        );
    }
}
