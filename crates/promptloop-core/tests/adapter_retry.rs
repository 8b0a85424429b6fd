//! Retry/backoff behaviour of the call adapter under paused tokio time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{rate_limited, ScriptedProvider};
use promptloop_core::{
    AdapterError, CallAdapter, CallResult, Completer, EvaluationCase, ProviderError, RetryPolicy,
    RunCounters,
};
use tokio::time::Instant;

fn ok(text: &str) -> Result<CallResult, ProviderError> {
    Ok(CallResult::new(text, vec![-0.5, -0.25]))
}

#[tokio::test(start_paused = true)]
async fn test_three_rate_limits_then_success_sleeps_about_seven_seconds() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        rate_limited(),
        rate_limited(),
        rate_limited(),
        ok("4"),
    ]));
    let adapter = CallAdapter::new(provider.clone(), RetryPolicy::default());

    let start = Instant::now();
    let result = adapter
        .complete("Answer.", &EvaluationCase::new("2+2"), 16)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.text, "4");
    assert_eq!(result.token_logprobs, vec![-0.5, -0.25]);
    assert_eq!(provider.calls(), 4);
    // 1 + 2 + 4 seconds, plus at most one second of jitter per retry
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(10), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_zero_jitter_sleeps_exactly_base_schedule() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        rate_limited(),
        rate_limited(),
        rate_limited(),
        ok("4"),
    ]));
    let policy = RetryPolicy {
        jitter_bound: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let adapter = CallAdapter::new(provider, policy);

    let start = Instant::now();
    adapter.generate("prompt", 16).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_four_failures_exhaust_retries() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        rate_limited(),
        rate_limited(),
        rate_limited(),
        rate_limited(),
        ok("never reached"),
    ]));
    let counters = Arc::new(RunCounters::new());
    let adapter =
        CallAdapter::new(provider.clone(), RetryPolicy::default()).with_counters(counters.clone());

    let err = adapter.generate("prompt", 16).await.unwrap_err();
    match &err {
        AdapterError::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, 4);
            assert!(matches!(last, ProviderError::RateLimited { .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(err.attempts(), 4);
    assert_eq!(provider.calls(), 4);

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.provider_calls, 4);
    assert_eq!(snapshot.retries, 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_are_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Server {
            status: 503,
            body: "overloaded".to_string(),
        }),
        ok("fine"),
    ]));
    let adapter = CallAdapter::new(provider.clone(), RetryPolicy::default());

    assert_eq!(adapter.generate("prompt", 16).await.unwrap().text, "fine");
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Client {
            status: 400,
            body: "bad request".to_string(),
        }),
        ok("unreachable"),
    ]));
    let adapter = CallAdapter::new(provider.clone(), RetryPolicy::default());

    let start = Instant::now();
    let err = adapter.generate("prompt", 16).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::NonRetryable(ProviderError::Client { status: 400, .. })
    ));
    assert_eq!(provider.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        ProviderError::MalformedResponse("missing choices".to_string()),
    )]));
    let adapter = CallAdapter::new(provider.clone(), RetryPolicy::default());

    assert!(matches!(
        adapter.generate("prompt", 16).await,
        Err(AdapterError::NonRetryable(ProviderError::MalformedResponse(_)))
    ));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_empty_logprobs_pass_through() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(CallResult::new(
        "answer",
        Vec::new(),
    ))]));
    let adapter = CallAdapter::new(provider, RetryPolicy::none());

    let result = adapter.generate("prompt", 16).await.unwrap();
    assert_eq!(result.text, "answer");
    assert!(result.token_logprobs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_retried_with_backoff() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Transport("operation timed out".to_string())),
        ok("recovered"),
    ]));
    let policy = RetryPolicy {
        jitter_bound: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let counters = Arc::new(RunCounters::new());
    let adapter = CallAdapter::new(provider.clone(), policy).with_counters(counters.clone());

    let start = Instant::now();
    let result = adapter.generate("prompt", 16).await.unwrap();
    assert_eq!(result.text, "recovered");
    assert_eq!(provider.calls(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(counters.snapshot().retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_request_is_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        ProviderError::InvalidRequest("bad header value".to_string()),
    )]));
    let adapter = CallAdapter::new(provider.clone(), RetryPolicy::default());

    assert!(matches!(
        adapter.generate("prompt", 16).await,
        Err(AdapterError::NonRetryable(ProviderError::InvalidRequest(_)))
    ));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_extends_the_backoff() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        }),
        ok("after hint"),
    ]));
    let policy = RetryPolicy {
        jitter_bound: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let adapter = CallAdapter::new(provider.clone(), policy);

    let start = Instant::now();
    assert_eq!(adapter.generate("prompt", 16).await.unwrap().text, "after hint");
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_short_retry_after_hint_keeps_the_schedule() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        rate_limited(),
        Err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_millis(100)),
        }),
        ok("on schedule"),
    ]));
    let policy = RetryPolicy {
        jitter_bound: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let adapter = CallAdapter::new(provider, policy);

    let start = Instant::now();
    adapter.generate("prompt", 16).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}
