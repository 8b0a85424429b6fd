//! Error taxonomy for promptloop.
//!
//! Metric conditions (empty log-probabilities, missing gold answers) are not
//! errors and have no variant here; they resolve to sentinel scores.

use std::time::Duration;

/// Fatal configuration problems, raised before any evaluation begins.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failure of a single raw provider attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited (HTTP 429){}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("provider rejected request (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl ProviderError {
    /// Rate limiting, 5xx responses and transport failures (timeouts,
    /// connection resets) are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Transport(_)
        )
    }

    /// Minimum wait requested by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Error surfaced by the call adapter after its retry policy is applied.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("provider call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ProviderError },

    #[error("provider call failed: {0}")]
    NonRetryable(ProviderError),

    #[error("call cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Number of provider attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            Self::NonRetryable(_) => 1,
            Self::Cancelled => 0,
        }
    }
}

/// Errors that abort an optimization run.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("generation {generation} produced an empty front: all {failed} candidates failed evaluation")]
    EmptyFront { generation: usize, failed: usize },

    #[error("run cancelled during generation {generation}")]
    Cancelled { generation: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Telemetry delivery failure. Always swallowed by the optimizer.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telemetry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors from reading the newline-delimited evaluation case file.
#[derive(Debug, thiserror::Error)]
pub enum CaseFileError {
    #[error("io error reading case file: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: query must not be empty")]
    EmptyQuery { line: usize },
}

/// Errors from writing or verifying run artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}
