//! Per-run atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`RunCounters::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters, shared by `Arc` within one run.
#[derive(Debug, Default)]
pub struct RunCounters {
    provider_calls: AtomicU64,
    retries: AtomicU64,
    candidates_evaluated: AtomicU64,
    candidates_failed: AtomicU64,
    telemetry_dropped: AtomicU64,
}

/// Point-in-time copy of [`RunCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub provider_calls: u64,
    pub retries: u64,
    pub candidates_evaluated: u64,
    pub candidates_failed: u64,
    pub telemetry_dropped: u64,
}

impl RunCounters {
    pub const fn new() -> Self {
        Self {
            provider_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            candidates_evaluated: AtomicU64::new(0),
            candidates_failed: AtomicU64::new(0),
            telemetry_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_provider_calls(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_candidates_evaluated(&self) {
        self.candidates_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_candidates_failed(&self) {
        self.candidates_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_telemetry_dropped(&self) {
        self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            candidates_evaluated: self.candidates_evaluated.load(Ordering::Relaxed),
            candidates_failed: self.candidates_failed.load(Ordering::Relaxed),
            telemetry_dropped: self.telemetry_dropped.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self, run_id: &str) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            run_id = %run_id,
            provider_calls = s.provider_calls,
            retries = s.retries,
            candidates_evaluated = s.candidates_evaluated,
            candidates_failed = s.candidates_failed,
            telemetry_dropped = s.telemetry_dropped,
        );
    }
}
