//! Exponential backoff with bounded random jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::{secs_to_duration, RunConfig};

/// Retry schedule for transient provider errors.
///
/// The delay before retry `n` (zero-based) is
/// `base_delay * backoff_factor^n + U(0, jitter_bound)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_bound: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter_bound: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: cfg.base_delay(),
            backoff_factor: cfg.backoff_factor,
            jitter_bound: cfg.jitter_bound(),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic part of the delay before retry `retry` (zero-based).
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        secs_to_duration(self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp))
    }

    /// Uniform jitter in `[0, jitter_bound]`.
    pub fn sample_jitter(&self) -> Duration {
        let bound = self.jitter_bound.as_secs_f64();
        if bound <= 0.0 {
            return Duration::ZERO;
        }
        secs_to_duration(rand::thread_rng().gen_range(0.0..=bound))
    }

    /// Full delay before retry `retry`, jitter included.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay_for(retry).saturating_add(self.sample_jitter())
    }
}
