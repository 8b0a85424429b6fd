//! Exact / near-exact answer match.

use super::NEUTRAL_SCORE;

/// Canonical form used for near-exact comparison: trimmed, lowercased,
/// internal whitespace collapsed, trailing sentence punctuation removed.
pub fn normalize_answer(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(&['.', '!', '?'][..])
        .trim_end()
        .to_lowercase()
}

/// 1.0 when the prediction matches the gold answer after normalization,
/// 0.0 otherwise, [`NEUTRAL_SCORE`] when there is no gold answer.
pub fn exact_match(prediction: &str, gold: Option<&str>) -> f64 {
    match gold {
        Some(gold) => {
            if normalize_answer(prediction) == normalize_answer(gold) {
                1.0
            } else {
                0.0
            }
        }
        None => NEUTRAL_SCORE,
    }
}
