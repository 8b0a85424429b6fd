//! Bundles the three metrics into one [`MetricVector`] per case.

use std::sync::Arc;

use super::exact::exact_match;
use super::grounding::{GroundingKind, GroundingScorer, LexicalOverlap};
use super::logprob::logprob_metric;
use crate::domain::{CallResult, EvaluationCase, MetricVector};

/// Scores a completion against its case on all three objectives.
#[derive(Clone)]
pub struct MetricSuite {
    grounding: Arc<dyn GroundingScorer>,
}

impl Default for MetricSuite {
    fn default() -> Self {
        Self::new(Arc::new(LexicalOverlap))
    }
}

impl std::fmt::Debug for MetricSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSuite")
            .field("grounding", &self.grounding.name())
            .finish()
    }
}

impl MetricSuite {
    pub fn new(grounding: Arc<dyn GroundingScorer>) -> Self {
        Self { grounding }
    }

    pub fn with_kind(kind: GroundingKind) -> Self {
        Self::new(Arc::from(kind.scorer()))
    }

    pub fn score(&self, result: &CallResult, case: &EvaluationCase) -> MetricVector {
        MetricVector {
            exact: exact_match(&result.text, case.gold.as_deref()),
            grounding: self.grounding.score(&result.text, case.sources.as_deref()),
            logprob: logprob_metric(&result.text, &result.token_logprobs, case, None),
        }
    }
}
