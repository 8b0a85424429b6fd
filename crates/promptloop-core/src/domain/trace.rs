//! Append-only run trace: one [`GenerationRecord`] per generation.

use serde::{Deserialize, Serialize};

use super::candidate::{MetricVector, ScoredCandidate};

/// A candidate dropped from its generation because evaluation failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateFailure {
    pub prompt: String,
    pub error: String,
    /// Provider attempts made on the failing case.
    pub attempts: u32,
}

/// Prompt and aggregate score of one surviving population member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopulationEntry {
    pub prompt: String,
    pub aggregate: MetricVector,
}

/// Everything recorded about one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRecord {
    /// Zero-based generation index.
    pub index: usize,
    /// Front members used as mutation parents.
    pub parents: Vec<String>,
    /// New prompts proposed for the next generation. Empty for the last one.
    pub offspring: Vec<String>,
    /// Non-dominated members of this generation, in population order.
    pub front: Vec<ScoredCandidate>,
    /// Every surviving member of the generation, in population order.
    #[serde(default)]
    pub population: Vec<PopulationEntry>,
    /// Candidates dropped because evaluation failed.
    #[serde(default)]
    pub failures: Vec<CandidateFailure>,
}

impl GenerationRecord {
    pub fn front_contains(&self, prompt: &str) -> bool {
        self.front.iter().any(|c| c.prompt == prompt)
    }
}

/// Ordered, append-only sequence of generation records.
///
/// Records can be appended and read but never modified or removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Trace {
    records: Vec<GenerationRecord>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, record: GenerationRecord) {
        debug_assert_eq!(record.index, self.records.len());
        self.records.push(record);
    }

    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&GenerationRecord> {
        self.records.last()
    }

    /// Whether `prompt` appears in any recorded front.
    pub fn in_any_front(&self, prompt: &str) -> bool {
        self.records.iter().any(|r| r.front_contains(prompt))
    }
}
