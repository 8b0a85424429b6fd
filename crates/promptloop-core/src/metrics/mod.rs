//! Metric suite: exactness, grounding, and log-probability surprise.
//!
//! Every metric maps a completion (and its case) to a scalar and never
//! fails. Missing inputs resolve to documented neutral values.

pub mod exact;
pub mod grounding;
pub mod logprob;
pub mod suite;

pub use exact::{exact_match, normalize_answer};
pub use grounding::{
    grounding_score, EntailmentBased, GroundingKind, GroundingScorer, LexicalOverlap,
};
pub use logprob::{logprob_metric, mean_logprob, EMPTY_LOGPROB_SENTINEL};
pub use suite::MetricSuite;

/// Score returned when the reference a metric needs (gold, sources) is absent.
pub const NEUTRAL_SCORE: f64 = 0.0;

/// Lowercased alphanumeric word tokens.
pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}
