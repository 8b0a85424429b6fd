//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use promptloop_core::{
    AdapterError, CallResult, CancelFlag, CompletionProvider, CompletionRequest, Completer,
    EvaluationCase, GenerationTelemetry, ProviderError, TelemetryError, TelemetrySink,
};

/// Provider that replays a fixed script of responses, then succeeds.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CallResult, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<CallResult, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn send(&self, _request: &CompletionRequest) -> Result<CallResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(CallResult::new("done", vec![-0.1])))
    }
}

pub fn rate_limited() -> Result<CallResult, ProviderError> {
    Err(ProviderError::RateLimited { retry_after: None })
}

/// Answers each case's gold only once the prompt carries refinements.
/// Prompts containing `fail_marker` fail as if retries were exhausted; an
/// empty marker fails every prompt.
pub struct OracleCompleter {
    pub fail_marker: Option<&'static str>,
    pub cancel_after: Option<(usize, CancelFlag)>,
    calls: AtomicUsize,
}

impl OracleCompleter {
    pub fn new() -> Self {
        Self {
            fail_marker: None,
            cancel_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_marker: Some(marker),
            ..Self::new()
        }
    }

    pub fn cancelling_after(calls: usize, flag: CancelFlag) -> Self {
        Self {
            cancel_after: Some((calls, flag)),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for OracleCompleter {
    async fn generate(&self, _text: &str, _max_tokens: u32) -> Result<CallResult, AdapterError> {
        Ok(CallResult::new("unused", vec![-1.0]))
    }

    async fn complete(
        &self,
        prompt: &str,
        case: &EvaluationCase,
        _max_tokens: u32,
    ) -> Result<CallResult, AdapterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if n >= *limit {
                flag.cancel();
            }
        }
        if self.fail_marker.is_some_and(|m| prompt.contains(m)) {
            return Err(AdapterError::RetriesExhausted {
                attempts: 4,
                last: ProviderError::RateLimited { retry_after: None },
            });
        }
        if prompt.contains("Refinements:") {
            let gold = case.gold.clone().unwrap_or_default();
            Ok(CallResult::new(gold, vec![-0.2, -0.1]))
        } else {
            Ok(CallResult::new("unknown", vec![-2.0, -3.0]))
        }
    }
}

/// Sink that always fails.
pub struct BrokenSink {
    pub attempts: AtomicUsize,
}

impl BrokenSink {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
        }
    }
}

impl TelemetrySink for BrokenSink {
    fn emit(&self, _record: &GenerationTelemetry) -> Result<(), TelemetryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TelemetryError::Unavailable("monitor offline".to_string()))
    }
}

/// Sink that keeps every record in memory.
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<GenerationTelemetry>>,
}

impl TelemetrySink for MemorySink {
    fn emit(&self, record: &GenerationTelemetry) -> Result<(), TelemetryError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Five arithmetic cases with known gold answers.
pub fn five_cases() -> Vec<EvaluationCase> {
    vec![
        EvaluationCase::new("2+2").with_gold("4"),
        EvaluationCase::new("3+4").with_gold("7"),
        EvaluationCase::new("10-1").with_gold("9"),
        EvaluationCase::new("capital of France")
            .with_gold("Paris")
            .with_sources("Paris is the capital of France."),
        EvaluationCase::new("opposite of hot").with_gold("cold").with_negative("warm"),
    ]
}
