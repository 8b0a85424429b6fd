//! Evaluation cases and the newline-delimited case file.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::CaseFileError;

/// One evaluation example.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationCase {
    /// Input handed to the classifier.
    pub query: String,

    /// Expected answer, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<String>,

    /// Reference text the answer should be grounded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,

    /// Contrastive answers the classifier should avoid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub negatives: Vec<String>,
}

impl EvaluationCase {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            gold: None,
            sources: None,
            negatives: Vec::new(),
        }
    }

    pub fn with_gold(mut self, gold: impl Into<String>) -> Self {
        self.gold = Some(gold.into());
        self
    }

    pub fn with_sources(mut self, sources: impl Into<String>) -> Self {
        self.sources = Some(sources.into());
        self
    }

    pub fn with_negative(mut self, negative: impl Into<String>) -> Self {
        self.negatives.push(negative.into());
        self
    }
}

/// The read-only case set shared by every candidate of a run.
pub type CaseSet = Arc<[EvaluationCase]>;

/// Parse newline-delimited JSON case records. Blank lines are skipped.
pub fn parse_cases(content: &str) -> Result<Vec<EvaluationCase>, CaseFileError> {
    let mut cases = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let case: EvaluationCase =
            serde_json::from_str(raw).map_err(|source| CaseFileError::Parse { line, source })?;
        if case.query.trim().is_empty() {
            return Err(CaseFileError::EmptyQuery { line });
        }
        cases.push(case);
    }
    Ok(cases)
}

/// Load a case file from disk.
pub fn load_cases(path: &Path) -> Result<Vec<EvaluationCase>, CaseFileError> {
    let content = std::fs::read_to_string(path)?;
    let cases = parse_cases(&content)?;
    tracing::debug!(path = %path.display(), count = cases.len(), "loaded evaluation cases");
    Ok(cases)
}
