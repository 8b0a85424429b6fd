//! Structured observability hooks for optimization runs.
//!
//! This module provides:
//! - a run-scoped tracing span for instrumenting the run future
//! - emitters for lifecycle events: run start, generation evaluated,
//!   candidate failure, provider retry, telemetry drop, run finish

use std::time::Duration;

use tracing::{info, warn};

use crate::domain::MetricVector;

/// Run-scoped span. [`Optimizer::run`](crate::Optimizer::run) attaches it to
/// the run future with [`tracing::Instrument::instrument`], so every event
/// emitted during the run carries its `run_id`:
///
/// ```ignore
/// async { /* evolve */ }.instrument(run_span(&run_id)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("promptloop.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, generations: usize, cases: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        generations = generations,
        cases = cases,
    );
}

/// Emit event: a generation finished evaluation and selection.
pub fn emit_generation_evaluated(
    generation: usize,
    population: usize,
    front: usize,
    failed: usize,
    best: Option<&MetricVector>,
) {
    info!(
        event = "generation.evaluated",
        generation = generation,
        population = population,
        front = front,
        failed = failed,
        best_exact = best.map(|m| m.exact),
        best_grounding = best.map(|m| m.grounding),
        best_logprob = best.map(|m| m.logprob),
    );
}

/// Emit event: a candidate was dropped from its generation.
pub fn emit_candidate_failed(generation: usize, prompt: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "candidate.failed",
        generation = generation,
        prompt_len = prompt.len(),
        error = %error,
    );
}

/// Emit event: a transient provider error is being retried.
pub fn emit_provider_retry(
    retry: u32,
    max_attempts: u32,
    delay: Duration,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "provider.retry",
        attempt = retry + 1,
        max_attempts = max_attempts,
        delay_secs = delay.as_secs_f64(),
        error = %error,
    );
}

/// Emit event: a telemetry record could not be delivered.
pub fn emit_telemetry_dropped(generation: usize, error: &dyn std::fmt::Display) {
    warn!(event = "telemetry.dropped", generation = generation, error = %error);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, generations: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        generations = generations,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
    }
}
