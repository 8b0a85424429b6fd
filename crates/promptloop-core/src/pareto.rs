//! Pareto-dominance selection over three-objective metric vectors.
//!
//! Every objective is maximised. Point `a` dominates `b` when `a` is at least
//! as good on every objective and strictly better on at least one. Ties,
//! including exact duplicates, never dominate each other, so all of them
//! stay on the front.

use std::cmp::Ordering;

use crate::domain::MetricVector;

/// Whether `a` dominates `b`.
///
/// A NaN component compares as neither `>=` nor `>`, so a vector containing
/// NaN can never dominate, and is dominated by nothing it is not `>=` to.
pub fn dominates(a: &MetricVector, b: &MetricVector) -> bool {
    let (a, b) = (a.as_array(), b.as_array());
    let all_ge = a.iter().zip(b.iter()).all(|(x, y)| x >= y);
    let any_gt = a.iter().zip(b.iter()).any(|(x, y)| x > y);
    all_ge && any_gt
}

/// Indices of the non-dominated points, in input order.
///
/// Non-empty for any non-empty input whose components are comparable. The
/// selected set of vectors does not depend on input order.
pub fn pareto_front(points: &[MetricVector]) -> Vec<usize> {
    (0..points.len())
        .filter(|&i| {
            !points
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && dominates(other, &points[i]))
        })
        .collect()
}

/// Lexicographic order on (exact, grounding, logprob) using IEEE total order.
pub fn lexicographic_cmp(a: &MetricVector, b: &MetricVector) -> Ordering {
    a.exact
        .total_cmp(&b.exact)
        .then_with(|| a.grounding.total_cmp(&b.grounding))
        .then_with(|| a.logprob.total_cmp(&b.logprob))
}

/// Pick one index from `candidates` (indices into `points`): the
/// lexicographic maximum over (exact, grounding, logprob). Fully tied
/// vectors resolve to the earliest index. `None` only for an empty slice.
pub fn select_champion(points: &[MetricVector], candidates: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for &idx in candidates {
        match best {
            None => best = Some(idx),
            Some(current) => {
                if lexicographic_cmp(&points[idx], &points[current]) == Ordering::Greater {
                    best = Some(idx);
                }
            }
        }
    }
    best
}
