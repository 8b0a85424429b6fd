//! Domain types shared by every promptloop component.

pub mod candidate;
pub mod case;
pub mod error;
pub mod trace;

pub use candidate::{CallResult, CandidateTrace, CaseTrace, MetricVector, ScoredCandidate};
pub use case::{load_cases, parse_cases, CaseSet, EvaluationCase};
pub use error::{
    AdapterError, ArtifactError, CaseFileError, ConfigError, OptimizeError, ProviderError,
    TelemetryError,
};
pub use trace::{CandidateFailure, GenerationRecord, PopulationEntry, Trace};
