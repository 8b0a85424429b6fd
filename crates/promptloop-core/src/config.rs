//! Run-scoped configuration.
//!
//! One [`RunConfig`] is built per optimization run and passed explicitly to
//! every component; there are no process-wide defaults beyond
//! [`RunConfig::default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Environment variable holding the provider credential.
pub const CREDENTIAL_ENV: &str = "TOGETHER_API_KEY";

/// Default chat model for completions.
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.2-3B-Instruct-Turbo";

/// Upper bound accepted for `base_delay_secs` and `jitter_bound_secs`.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Upper bound accepted for `backoff_factor`.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

/// Configuration shared by the optimizer, call adapter and router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Number of generations to run (at least 1).
    pub generations: usize,
    /// Hard cap on the number of candidates in one generation.
    pub population_size: usize,
    /// Maximum offspring taken from each front member per generation.
    pub children_per_parent: usize,
    /// Carry front members into the next generation alongside offspring.
    pub keep_parents: bool,
    /// Retries after the first failed attempt (total attempts = retries + 1).
    pub max_retries: u32,
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: f64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Upper bound of the uniform random jitter added to each delay, in seconds.
    pub jitter_bound_secs: f64,
    /// Log-probability sum below which the router escalates.
    pub confidence_threshold: f64,
    /// Completion length limit per call.
    pub max_tokens: u32,
    /// Maximum in-flight case evaluations for one candidate.
    pub case_concurrency: usize,
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            generations: 2,
            population_size: 8,
            children_per_parent: 2,
            keep_parents: true,
            max_retries: 3,
            base_delay_secs: 1.0,
            backoff_factor: 2.0,
            jitter_bound_secs: 1.0,
            confidence_threshold: -30.0,
            max_tokens: 128,
            case_concurrency: 4,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
        }
    }
}

impl RunConfig {
    /// Defaults overlaid with any `PROMPTLOOP_*` environment variables.
    ///
    /// Unparseable values are a configuration error, not silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        env_parse("PROMPTLOOP_GENERATIONS", &mut cfg.generations)?;
        env_parse("PROMPTLOOP_POPULATION_SIZE", &mut cfg.population_size)?;
        env_parse("PROMPTLOOP_CHILDREN_PER_PARENT", &mut cfg.children_per_parent)?;
        env_parse("PROMPTLOOP_KEEP_PARENTS", &mut cfg.keep_parents)?;
        env_parse("PROMPTLOOP_MAX_RETRIES", &mut cfg.max_retries)?;
        env_parse("PROMPTLOOP_BASE_DELAY_SECS", &mut cfg.base_delay_secs)?;
        env_parse("PROMPTLOOP_BACKOFF_FACTOR", &mut cfg.backoff_factor)?;
        env_parse("PROMPTLOOP_JITTER_BOUND_SECS", &mut cfg.jitter_bound_secs)?;
        env_parse(
            "PROMPTLOOP_CONFIDENCE_THRESHOLD",
            &mut cfg.confidence_threshold,
        )?;
        env_parse("PROMPTLOOP_MAX_TOKENS", &mut cfg.max_tokens)?;
        env_parse("PROMPTLOOP_CASE_CONCURRENCY", &mut cfg.case_concurrency)?;
        env_parse("PROMPTLOOP_TEMPERATURE", &mut cfg.temperature)?;
        if let Ok(model) = std::env::var("PROMPTLOOP_MODEL") {
            cfg.model = model;
        }
        Ok(cfg)
    }

    pub fn with_generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    pub fn with_population_size(mut self, population_size: usize) -> Self {
        self.population_size = population_size;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Check internal consistency. Called by the optimizer before any work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generations == 0 {
            return Err(invalid("generations must be at least 1"));
        }
        if self.population_size == 0 {
            return Err(invalid("population_size must be at least 1"));
        }
        if self.case_concurrency == 0 {
            return Err(invalid("case_concurrency must be at least 1"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens must be at least 1"));
        }
        if !(0.0..=MAX_DELAY_SECS).contains(&self.base_delay_secs) {
            return Err(invalid("base_delay_secs must be between 0 and 3600"));
        }
        if !(0.0..=MAX_DELAY_SECS).contains(&self.jitter_bound_secs) {
            return Err(invalid("jitter_bound_secs must be between 0 and 3600"));
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&self.backoff_factor) {
            return Err(invalid("backoff_factor must be between 1 and 10"));
        }
        if !self.confidence_threshold.is_finite() {
            return Err(invalid("confidence_threshold must be finite"));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        secs_to_duration(self.base_delay_secs)
    }

    pub fn jitter_bound(&self) -> Duration {
        secs_to_duration(self.jitter_bound_secs)
    }
}

/// Read the provider credential, failing fast when it is absent or blank.
pub fn credential_from_env() -> Result<String, ConfigError> {
    match std::env::var(CREDENTIAL_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingCredential {
            var: CREDENTIAL_ENV.to_string(),
        }),
    }
}

/// Saturating seconds-to-`Duration`; negative or NaN input maps to zero.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn env_parse<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<(), ConfigError> {
    match std::env::var(var) {
        Ok(raw) => {
            *slot = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{var}: cannot parse {raw:?}")))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}
