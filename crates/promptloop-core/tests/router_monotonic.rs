//! Property tests: escalation never decreases as confidence drops.

use proptest::prelude::*;

use promptloop_core::{
    best_threshold, should_escalate, CalibrationSample, ConfidenceRouter, ScoreBins,
};

fn sample() -> impl Strategy<Value = CalibrationSample> {
    (prop::collection::vec(-10.0f64..0.0, 0..6), any::<bool>()).prop_map(
        |(token_logprobs, correct)| CalibrationSample {
            token_logprobs,
            correct,
        },
    )
}

proptest! {
    #[test]
    fn threshold_router_is_monotonic(
        threshold in -100.0f64..0.0,
        a in -200.0f64..10.0,
        b in -200.0f64..10.0,
    ) {
        let router = ConfidenceRouter::threshold(threshold);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(router.escalates_sum(low) >= router.escalates_sum(high));
    }

    #[test]
    fn calibrated_router_is_monotonic(
        samples in prop::collection::vec(sample(), 0..40),
        bins in 1usize..6,
        min_accuracy in 0.0f64..=1.0,
        a in -80.0f64..5.0,
        b in -80.0f64..5.0,
    ) {
        let router = ConfidenceRouter::calibrated(ScoreBins::from_samples(&samples, bins, min_accuracy));
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(router.escalates_sum(low) >= router.escalates_sum(high));
    }

    #[test]
    fn adding_a_token_never_reduces_escalation(
        threshold in -60.0f64..0.0,
        logprobs in prop::collection::vec(-10.0f64..=0.0, 1..12),
        extra in -10.0f64..=0.0,
    ) {
        let mut longer = logprobs.clone();
        longer.push(extra);
        if should_escalate(&logprobs, threshold) {
            prop_assert!(should_escalate(&longer, threshold));
        }
    }

    #[test]
    fn empty_input_always_escalates(threshold in -1e6f64..1e6) {
        prop_assert!(should_escalate(&[], threshold));
        prop_assert!(ConfidenceRouter::threshold(threshold).should_escalate(&[]));
    }

    #[test]
    fn best_threshold_is_an_observed_sum_or_default(samples in prop::collection::vec(sample(), 0..30)) {
        let threshold = best_threshold(&samples);
        let sums: Vec<f64> = samples
            .iter()
            .filter(|s| !s.token_logprobs.is_empty())
            .map(|s| s.token_logprobs.iter().sum())
            .collect();
        if sums.is_empty() {
            prop_assert_eq!(threshold, -50.0);
        } else {
            prop_assert!(sums.contains(&threshold));
        }
    }
}
