//! Surprise-aware score from per-token log-probabilities.

use std::collections::HashSet;

use super::exact::{exact_match, normalize_answer};
use super::words;
use crate::domain::EvaluationCase;

/// Returned when there are no usable log-probabilities. Roughly one order of
/// magnitude below a typical confident per-token mean, so a silent provider
/// never outranks one that reported its confidence.
pub const EMPTY_LOGPROB_SENTINEL: f64 = -10.0;

/// Weight of the exact-match bonus when the case has a gold answer.
const GOLD_BONUS_WEIGHT: f64 = 0.05;

/// Weight of the contrastive penalty against negatives.
const NEGATIVE_PENALTY_WEIGHT: f64 = 0.5;

/// Mean of the finite entries, or `None` when there are none.
pub fn mean_logprob(token_logprobs: &[f64]) -> Option<f64> {
    let (sum, count) = token_logprobs
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0_f64, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Largest share of any negative's words that the prediction reproduces.
/// An exact (normalized) match with a negative is a full 1.0.
fn negative_overlap(text: &str, negatives: &[String]) -> f64 {
    if negatives.is_empty() {
        return 0.0;
    }
    let normalized = normalize_answer(text);
    let predicted: HashSet<String> = words(text).collect();

    negatives
        .iter()
        .map(|neg| {
            if normalize_answer(neg) == normalized {
                return 1.0;
            }
            let neg_words: HashSet<String> = words(neg).collect();
            if neg_words.is_empty() {
                return 0.0;
            }
            neg_words.intersection(&predicted).count() as f64 / neg_words.len() as f64
        })
        .fold(0.0_f64, f64::max)
}

/// Mean token log-probability, adjusted by a small bonus for matching the
/// case's gold answer and a contrastive penalty for echoing a negative.
///
/// `negatives` overrides the case's own negatives when given. An empty (or
/// all non-finite) `token_logprobs` returns [`EMPTY_LOGPROB_SENTINEL`]
/// without adjustment.
pub fn logprob_metric(
    text: &str,
    token_logprobs: &[f64],
    inputs: &EvaluationCase,
    negatives: Option<&[String]>,
) -> f64 {
    let Some(mean) = mean_logprob(token_logprobs) else {
        return EMPTY_LOGPROB_SENTINEL;
    };

    let bonus = match inputs.gold.as_deref() {
        Some(gold) => GOLD_BONUS_WEIGHT * exact_match(text, Some(gold)),
        None => 0.0,
    };
    let negatives = negatives.unwrap_or(inputs.negatives.as_slice());
    let penalty = negative_overlap(text, negatives);

    mean + bonus - NEGATIVE_PENALTY_WEIGHT * penalty
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_logprobs_return_sentinel() {
        let case = EvaluationCase::new("q").with_gold("a");
        assert_eq!(logprob_metric("a", &[], &case, None), EMPTY_LOGPROB_SENTINEL);
    }

    #[test]
    fn test_non_finite_values_are_skipped() {
        assert_eq!(mean_logprob(&[f64::NAN, -1.0, f64::NEG_INFINITY, -3.0]), Some(-2.0));
        let case = EvaluationCase::new("q");
        assert_eq!(
            logprob_metric("x", &[f64::NAN], &case, None),
            EMPTY_LOGPROB_SENTINEL
        );
    }

    #[test]
    fn test_mean_without_adjustments() {
        let case = EvaluationCase::new("q");
        assert!(approx(logprob_metric("x", &[-1.0, -2.0, -3.0], &case, None), -2.0));
    }

    #[test]
    fn test_gold_bonus() {
        let case = EvaluationCase::new("q").with_gold("4");
        assert!(approx(logprob_metric("4", &[-1.0], &case, None), -0.95));
        assert!(approx(logprob_metric("5", &[-1.0], &case, None), -1.0));
    }

    #[test]
    fn test_contrastive_penalty_from_case_negatives() {
        let case = EvaluationCase::new("q").with_negative("no risk");
        assert!(approx(logprob_metric("no risk", &[-1.0], &case, None), -1.5));
        assert!(approx(logprob_metric("risk", &[-1.0], &case, None), -1.25));
        assert!(approx(logprob_metric("safe", &[-1.0], &case, None), -1.0));
    }

    #[test]
    fn test_explicit_negatives_override_case() {
        let case = EvaluationCase::new("q").with_negative("alpha");
        let negatives = vec!["beta".to_string()];
        assert!(approx(
            logprob_metric("alpha", &[-1.0], &case, Some(negatives.as_slice())),
            -1.0
        ));
    }
}
