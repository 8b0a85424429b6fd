//! Confidence routing
//!
//! Decides whether a live response should be escalated by comparing the sum
//! of its per-token log-probabilities against a threshold, or against a
//! calibrated score table. An empty or non-finite input is maximal
//! uncertainty and always escalates. For a fixed router, a lower sum never
//! escalates less often than a higher one.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactError, CallResult, ConfigError};

/// Threshold used when calibration has no usable samples.
pub const DEFAULT_CALIBRATED_THRESHOLD: f64 = -50.0;

/// Sum of `token_logprobs`, or `None` when the input carries no usable
/// confidence signal (empty, or any non-finite entry).
pub fn confidence_sum(token_logprobs: &[f64]) -> Option<f64> {
    if token_logprobs.is_empty() || token_logprobs.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(token_logprobs.iter().sum())
}

/// Sum of the finite entries; 0.0 for an empty input. Used for reporting.
pub fn reported_sum(token_logprobs: &[f64]) -> f64 {
    token_logprobs.iter().filter(|v| v.is_finite()).sum()
}

/// Escalate when the summed log-probability falls below `threshold`.
pub fn should_escalate(token_logprobs: &[f64], threshold: f64) -> bool {
    match confidence_sum(token_logprobs) {
        Some(sum) => sum < threshold,
        None => true,
    }
}

/// A correctness-by-score table with a non-decreasing accuracy column.
///
/// Deserialization re-checks the table shape, so a hand-edited file cannot
/// break monotonic escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScoreBins")]
pub struct ScoreBins {
    /// Lower score bound of each bin, ascending.
    lower_bounds: Vec<f64>,
    /// Running-max accuracy per bin, non-decreasing.
    accuracy: Vec<f64>,
    /// Bins below this accuracy escalate.
    min_accuracy: f64,
}

impl ScoreBins {
    /// Build `bins` equal-count bins from labelled samples. Samples without
    /// a usable confidence sum are ignored.
    pub fn from_samples(samples: &[CalibrationSample], bins: usize, min_accuracy: f64) -> Self {
        let mut scored: Vec<(f64, bool)> = samples
            .iter()
            .filter_map(|s| confidence_sum(&s.token_logprobs).map(|sum| (sum, s.correct)))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut lower_bounds = Vec::new();
        let mut accuracy = Vec::new();
        if !scored.is_empty() && bins > 0 {
            let per_bin = scored.len().div_ceil(bins);
            let mut running = 0.0_f64;
            for chunk in scored.chunks(per_bin) {
                let correct = chunk.iter().filter(|(_, ok)| *ok).count();
                running = running.max(correct as f64 / chunk.len() as f64);
                lower_bounds.push(chunk[0].0);
                accuracy.push(running);
            }
        }
        Self {
            lower_bounds,
            accuracy,
            min_accuracy,
        }
    }

    /// Build a table from explicit columns, rejecting malformed shapes.
    pub fn new(
        lower_bounds: Vec<f64>,
        accuracy: Vec<f64>,
        min_accuracy: f64,
    ) -> Result<Self, ConfigError> {
        let bins = Self {
            lower_bounds,
            accuracy,
            min_accuracy,
        };
        bins.validate()?;
        Ok(bins)
    }

    /// Equal-length columns, ascending finite bounds, and a non-decreasing
    /// accuracy column within `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lower_bounds.len() != self.accuracy.len() {
            return Err(ConfigError::Invalid(format!(
                "score bins: {} bounds but {} accuracy values",
                self.lower_bounds.len(),
                self.accuracy.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.min_accuracy) {
            return Err(ConfigError::Invalid(
                "score bins: min_accuracy must be within [0, 1]".to_string(),
            ));
        }
        if self.lower_bounds.iter().any(|b| !b.is_finite())
            || self.lower_bounds.windows(2).any(|w| w[0] > w[1])
        {
            return Err(ConfigError::Invalid(
                "score bins: lower bounds must be finite and ascending".to_string(),
            ));
        }
        if self.accuracy.iter().any(|a| !(0.0..=1.0).contains(a))
            || self.accuracy.windows(2).any(|w| w[0] > w[1])
        {
            return Err(ConfigError::Invalid(
                "score bins: accuracy must be non-decreasing within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.lower_bounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lower_bounds.len()
    }

    /// Accuracy of the bin containing `sum`. Scores below the first bound
    /// fall into the first bin.
    pub fn accuracy_for(&self, sum: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let idx = self
            .lower_bounds
            .partition_point(|&bound| bound <= sum)
            .saturating_sub(1);
        Some(self.accuracy[idx])
    }

    fn escalates(&self, sum: f64) -> bool {
        match self.accuracy_for(sum) {
            Some(acc) => acc < self.min_accuracy,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct RawScoreBins {
    lower_bounds: Vec<f64>,
    accuracy: Vec<f64>,
    min_accuracy: f64,
}

impl TryFrom<RawScoreBins> for ScoreBins {
    type Error = ConfigError;

    fn try_from(raw: RawScoreBins) -> Result<Self, Self::Error> {
        Self::new(raw.lower_bounds, raw.accuracy, raw.min_accuracy)
    }
}

/// Escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfidenceRouter {
    Threshold { threshold: f64 },
    Calibrated { bins: ScoreBins },
}

impl ConfidenceRouter {
    pub fn threshold(threshold: f64) -> Self {
        Self::Threshold { threshold }
    }

    pub fn calibrated(bins: ScoreBins) -> Self {
        Self::Calibrated { bins }
    }

    /// Decision for an aggregate score.
    pub fn escalates_sum(&self, sum: f64) -> bool {
        if sum.is_nan() {
            return true;
        }
        match self {
            Self::Threshold { threshold } => sum < *threshold,
            Self::Calibrated { bins } => bins.escalates(sum),
        }
    }

    pub fn should_escalate(&self, token_logprobs: &[f64]) -> bool {
        match confidence_sum(token_logprobs) {
            Some(sum) => self.escalates_sum(sum),
            None => true,
        }
    }

    /// Shape the serving response for a fresh completion.
    pub fn route(&self, result: &CallResult) -> RouteDecision {
        RouteDecision {
            answer: result.text.clone(),
            confidence_logprob_sum: reported_sum(&result.token_logprobs),
            escalate: self.should_escalate(&result.token_logprobs),
        }
    }
}

/// Serving response. Fields may be added but never removed or retyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub answer: String,
    pub confidence_logprob_sum: f64,
    pub escalate: bool,
}

/// One labelled completion, as written by `promptloop eval --records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub token_logprobs: Vec<f64>,
    pub correct: bool,
}

/// Share of samples classified correctly by `threshold` (confident and
/// correct, or escalated and incorrect).
fn accuracy_at(sums: &[(f64, bool)], threshold: f64) -> f64 {
    let hits = sums
        .iter()
        .filter(|(s, ok)| (*s >= threshold) == *ok)
        .count();
    hits as f64 / sums.len().max(1) as f64
}

/// Sweep every observed sum as a candidate threshold and keep the most
/// accurate one; ties keep the lowest threshold. Returns
/// [`DEFAULT_CALIBRATED_THRESHOLD`] when no sample is usable.
pub fn best_threshold(samples: &[CalibrationSample]) -> f64 {
    let sums: Vec<(f64, bool)> = samples
        .iter()
        .filter_map(|s| confidence_sum(&s.token_logprobs).map(|sum| (sum, s.correct)))
        .collect();
    let mut candidates: Vec<f64> = sums.iter().map(|(s, _)| *s).collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    let mut best: Option<(f64, f64)> = None;
    for t in candidates {
        let acc = accuracy_at(&sums, t);
        if best.map_or(true, |(_, best_acc)| acc > best_acc) {
            best = Some((t, acc));
        }
    }
    best.map_or(DEFAULT_CALIBRATED_THRESHOLD, |(t, _)| t)
}

/// Persisted calibration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub threshold: f64,
    #[serde(default)]
    pub samples: usize,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Calibrated score table; when present and non-empty it takes
    /// precedence over `threshold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<ScoreBins>,
    pub calibrated_at: DateTime<Utc>,
}

impl CalibrationFile {
    pub fn from_samples(samples: &[CalibrationSample]) -> Self {
        let threshold = best_threshold(samples);
        let sums: Vec<(f64, bool)> = samples
            .iter()
            .filter_map(|s| confidence_sum(&s.token_logprobs).map(|sum| (sum, s.correct)))
            .collect();
        let accuracy = (!sums.is_empty()).then(|| accuracy_at(&sums, threshold));
        Self {
            threshold,
            samples: sums.len(),
            accuracy,
            bins: None,
            calibrated_at: Utc::now(),
        }
    }

    /// Also store a `bins`-bin score table built from the same samples.
    pub fn with_bins(
        mut self,
        samples: &[CalibrationSample],
        bins: usize,
        min_accuracy: f64,
    ) -> Result<Self, ConfigError> {
        if bins == 0 {
            return Err(ConfigError::Invalid("score bins: need at least one bin".to_string()));
        }
        let table = ScoreBins::from_samples(samples, bins, min_accuracy);
        table.validate()?;
        self.bins = Some(table);
        Ok(self)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    pub fn router(&self) -> ConfidenceRouter {
        match &self.bins {
            Some(bins) if !bins.is_empty() => ConfidenceRouter::calibrated(bins.clone()),
            _ => ConfidenceRouter::threshold(self.threshold),
        }
    }
}

/// Read newline-delimited calibration samples, skipping blank lines.
pub fn read_calibration_samples(path: &Path) -> Result<Vec<CalibrationSample>, ArtifactError> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(ArtifactError::from))
        .collect()
}

/// Write calibration samples as newline-delimited JSON.
pub fn write_calibration_samples(
    samples: &[CalibrationSample],
    path: &Path,
) -> Result<(), ArtifactError> {
    let mut file = std::fs::File::create(path)?;
    for sample in samples {
        serde_json::to_writer(&mut file, sample)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}
