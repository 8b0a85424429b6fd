//! Completion results, metric vectors, and scored candidates.

use serde::{Deserialize, Serialize};

use super::case::EvaluationCase;

/// Generated text plus per-token log-probabilities for one (prompt, case) call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResult {
    pub text: String,
    /// Empty when the provider returned no log-probabilities.
    pub token_logprobs: Vec<f64>,
}

impl CallResult {
    pub fn new(text: impl Into<String>, token_logprobs: Vec<f64>) -> Self {
        Self {
            text: text.into(),
            token_logprobs,
        }
    }
}

/// Three-objective score. Larger is better on every axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricVector {
    /// 0.0–1.0.
    pub exact: f64,
    /// 0.0–1.0.
    pub grounding: f64,
    /// Unbounded, usually negative.
    pub logprob: f64,
}

impl MetricVector {
    pub const DIMENSIONS: usize = 3;

    pub fn new(exact: f64, grounding: f64, logprob: f64) -> Self {
        Self {
            exact,
            grounding,
            logprob,
        }
    }

    /// Objectives in tie-break order: exact, grounding, logprob.
    pub fn as_array(&self) -> [f64; Self::DIMENSIONS] {
        [self.exact, self.grounding, self.logprob]
    }

    /// Component-wise mean. Returns `None` for an empty input.
    pub fn mean<'a, I>(vectors: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a MetricVector>,
    {
        let mut sum = [0.0_f64; Self::DIMENSIONS];
        let mut count = 0usize;
        for v in vectors {
            for (acc, x) in sum.iter_mut().zip(v.as_array()) {
                *acc += x;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Self::new(sum[0] / n, sum[1] / n, sum[2] / n))
    }
}

impl From<(f64, f64, f64)> for MetricVector {
    fn from((exact, grounding, logprob): (f64, f64, f64)) -> Self {
        Self::new(exact, grounding, logprob)
    }
}

/// A prompt evaluated across the complete case set.
///
/// # Invariants
///
/// `per_case_results` and `per_case_scores` have one entry per case, in case
/// order, and `aggregate` is their mean. A candidate with any failed case is
/// never represented by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub prompt: String,
    pub per_case_results: Vec<CallResult>,
    pub per_case_scores: Vec<MetricVector>,
    pub aggregate: MetricVector,
}

/// Read-only view pairing a scored candidate with the cases it was scored on.
/// This is what the reflection mutator sees.
#[derive(Debug, Clone, Copy)]
pub struct CandidateTrace<'a> {
    pub cases: &'a [EvaluationCase],
    pub candidate: &'a ScoredCandidate,
}

/// One case as seen through a [`CandidateTrace`].
#[derive(Debug, Clone, Copy)]
pub struct CaseTrace<'a> {
    pub case: &'a EvaluationCase,
    pub result: &'a CallResult,
    pub scores: &'a MetricVector,
}

impl<'a> CandidateTrace<'a> {
    pub fn new(cases: &'a [EvaluationCase], candidate: &'a ScoredCandidate) -> Self {
        Self { cases, candidate }
    }

    pub fn iter(&self) -> impl Iterator<Item = CaseTrace<'a>> + 'a {
        let candidate = self.candidate;
        self.cases
            .iter()
            .zip(candidate.per_case_results.iter())
            .zip(candidate.per_case_scores.iter())
            .map(|((case, result), scores)| CaseTrace {
                case,
                result,
                scores,
            })
    }

    /// Cases with a gold answer that did not score a full exact match.
    pub fn failures(&self) -> impl Iterator<Item = CaseTrace<'a>> + 'a {
        self.iter()
            .filter(|c| c.case.gold.is_some() && c.scores.exact < 1.0)
    }
}
