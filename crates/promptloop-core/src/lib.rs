//! promptloop core library
//!
//! Evolves a prompt against a fixed evaluation set with multi-objective
//! (exactness, grounding, log-probability) Pareto selection, and routes live
//! responses by their summed log-probability.

pub mod adapter;
pub mod artifact;
pub mod config;
pub mod counters;
pub mod domain;
pub mod metrics;
pub mod mutator;
pub mod obs;
pub mod optimizer;
pub mod pareto;
pub mod router;
pub mod sink;
pub mod telemetry;

pub use adapter::{
    render_prompt, CallAdapter, Completer, CompletionProvider, CompletionRequest, RetryPolicy,
    TogetherProvider,
};

pub use artifact::{
    read_champion, read_run_artifact, trace_digest, write_champion, write_run_artifact,
    RunArtifact,
};

pub use config::{credential_from_env, RunConfig, CREDENTIAL_ENV, DEFAULT_MODEL};

pub use counters::{CounterSnapshot, RunCounters};

pub use domain::{
    load_cases, parse_cases, AdapterError, ArtifactError, CallResult, CandidateFailure,
    CandidateTrace, CaseFileError, CaseSet, CaseTrace, ConfigError, EvaluationCase,
    GenerationRecord, MetricVector, OptimizeError, PopulationEntry, ProviderError,
    ScoredCandidate, TelemetryError, Trace,
};

pub use metrics::{
    exact_match, grounding_score, logprob_metric, EntailmentBased, GroundingKind,
    GroundingScorer, LexicalOverlap, MetricSuite, EMPTY_LOGPROB_SENTINEL,
};

pub use mutator::{ModelAssistedMutator, MutatorKind, PromptMutator, RuleBasedMutator};

pub use optimizer::{CancelFlag, Optimizer, Phase, RunOutcome};

pub use pareto::{dominates, pareto_front, select_champion};

pub use router::{
    best_threshold, should_escalate, CalibrationFile, CalibrationSample, ConfidenceRouter,
    RouteDecision, ScoreBins,
};

pub use sink::{GenerationTelemetry, JsonlSink, TelemetrySink, TracingSink};

pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
