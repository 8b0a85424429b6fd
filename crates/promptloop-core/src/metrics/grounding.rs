//! Grounding: how well a prediction is supported by reference sources.
//!
//! Two interchangeable scorers sit behind [`GroundingScorer`]:
//! - [`LexicalOverlap`]: share of distinct source words found in the prediction.
//! - [`EntailmentBased`]: share of prediction sentences whose content words
//!   are all present in the sources.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{words, NEUTRAL_SCORE};

/// Grounding capability. Scores are in 0.0–1.0.
pub trait GroundingScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score against `sources`; [`NEUTRAL_SCORE`] when sources are absent or blank.
    fn score(&self, prediction: &str, sources: Option<&str>) -> f64;
}

/// Named grounding variants, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingKind {
    #[default]
    LexicalOverlap,
    EntailmentBased,
}

impl GroundingKind {
    pub fn scorer(self) -> Box<dyn GroundingScorer> {
        match self {
            Self::LexicalOverlap => Box::new(LexicalOverlap),
            Self::EntailmentBased => Box::new(EntailmentBased::default()),
        }
    }
}

impl std::str::FromStr for GroundingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" | "lexical_overlap" => Ok(Self::LexicalOverlap),
            "entailment" | "entailment_based" => Ok(Self::EntailmentBased),
            other => Err(format!("unknown grounding scorer: {other}")),
        }
    }
}

fn non_blank(sources: Option<&str>) -> Option<&str> {
    sources.filter(|s| !s.trim().is_empty())
}

/// Fraction of distinct source words that also occur in the prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlap;

impl GroundingScorer for LexicalOverlap {
    fn name(&self) -> &'static str {
        "lexical_overlap"
    }

    fn score(&self, prediction: &str, sources: Option<&str>) -> f64 {
        let Some(sources) = non_blank(sources) else {
            return NEUTRAL_SCORE;
        };
        let source_words: HashSet<String> = words(sources).collect();
        if source_words.is_empty() {
            return NEUTRAL_SCORE;
        }
        let predicted: HashSet<String> = words(prediction).collect();
        let hits = source_words.intersection(&predicted).count();
        hits as f64 / source_words.len() as f64
    }
}

/// Convenience for the default lexical scorer.
pub fn grounding_score(prediction: &str, sources: Option<&str>) -> f64 {
    LexicalOverlap.score(prediction, sources)
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were",
    "will", "with", "you", "your",
];

/// Sentence-level support check: a sentence is entailed when every content
/// word in it appears somewhere in the sources.
#[derive(Debug, Clone)]
pub struct EntailmentBased {
    /// Words shorter than this are treated as function words.
    pub min_content_len: usize,
}

impl Default for EntailmentBased {
    fn default() -> Self {
        Self { min_content_len: 3 }
    }
}

impl EntailmentBased {
    fn content_words<'t>(&'t self, sentence: &'t str) -> impl Iterator<Item = String> + 't {
        words(sentence)
            .filter(move |w| w.chars().count() >= self.min_content_len)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
    }
}

impl GroundingScorer for EntailmentBased {
    fn name(&self) -> &'static str {
        "entailment_based"
    }

    fn score(&self, prediction: &str, sources: Option<&str>) -> f64 {
        let Some(sources) = non_blank(sources) else {
            return NEUTRAL_SCORE;
        };
        let source_words: HashSet<String> = words(sources).collect();

        let mut judged = 0usize;
        let mut supported = 0usize;
        for sentence in prediction.split(['.', '!', '?', '\n'].as_slice()) {
            let content: Vec<String> = self.content_words(sentence).collect();
            if content.is_empty() {
                continue;
            }
            judged += 1;
            if content.iter().all(|w| source_words.contains(w)) {
                supported += 1;
            }
        }

        if judged == 0 {
            return NEUTRAL_SCORE;
        }
        supported as f64 / judged as f64
    }
}
