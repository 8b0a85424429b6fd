//! Reflective prompt mutation.
//!
//! A [`PromptMutator`] reads a prompt's evaluation trace and proposes
//! revised prompts. The optimizer depends only on the trait; two variants
//! ship here:
//! - [`RuleBasedMutator`] appends refinement rules derived from failures.
//! - [`ModelAssistedMutator`] asks the completion model to rewrite the prompt.
//!
//! Mutators never modify their inputs and never return the input prompt.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::Completer;
use crate::domain::CandidateTrace;
use crate::metrics::normalize_answer;

/// Proposes revisions of a prompt from its evaluation trace.
#[async_trait]
pub trait PromptMutator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Zero or more new prompts, each different from `prompt`.
    async fn propose(&self, prompt: &str, trace: CandidateTrace<'_>) -> Vec<String>;
}

/// Named mutator variants, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutatorKind {
    #[default]
    RuleBased,
    ModelAssisted,
}

impl std::str::FromStr for MutatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rule" | "rules" | "rule_based" => Ok(Self::RuleBased),
            "model" | "model_assisted" => Ok(Self::ModelAssisted),
            other => Err(format!("unknown mutator: {other}")),
        }
    }
}

const REFINEMENTS_HEADER: &str = "Refinements:";
const KEEP_SUCCESSES_RULE: &str = "- Keep successes; tighten formatting.";
const GROUNDING_RULE: &str = "- Use only facts stated in the provided sources.";

/// Below this mean grounding, a sourcing rule is added.
const LOW_GROUNDING: f64 = 0.5;

/// Appends a `Refinements:` block of rules learned from the trace.
///
/// Rules already present in the prompt are not repeated; when nothing new
/// can be said the mutator proposes nothing.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedMutator;

impl RuleBasedMutator {
    fn rules(trace: &CandidateTrace<'_>) -> BTreeSet<String> {
        let mut rules = BTreeSet::new();

        for failure in trace.failures() {
            if let Some(gold) = failure.case.gold.as_deref() {
                rules.insert(format!(
                    "- Prefer exact string: `{}` when unambiguous.",
                    gold.trim()
                ));
            }
        }

        for case in trace.iter() {
            let answer = normalize_answer(&case.result.text);
            for neg in &case.case.negatives {
                if !answer.is_empty() && normalize_answer(neg) == answer {
                    rules.insert(format!("- Never answer `{}`.", neg.trim()));
                }
            }
        }

        let sourced: Vec<f64> = trace
            .iter()
            .filter(|c| c.case.sources.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .map(|c| c.scores.grounding)
            .collect();
        if !sourced.is_empty() {
            let mean = sourced.iter().sum::<f64>() / sourced.len() as f64;
            if mean < LOW_GROUNDING {
                rules.insert(GROUNDING_RULE.to_string());
            }
        }

        if rules.is_empty() {
            rules.insert(KEEP_SUCCESSES_RULE.to_string());
        }
        rules
    }
}

#[async_trait]
impl PromptMutator for RuleBasedMutator {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    async fn propose(&self, prompt: &str, trace: CandidateTrace<'_>) -> Vec<String> {
        let existing: BTreeSet<&str> = prompt.lines().map(str::trim).collect();
        let new_rules: Vec<String> = Self::rules(&trace)
            .into_iter()
            .filter(|r| !existing.contains(r.as_str()))
            .collect();

        if new_rules.is_empty() {
            debug!("rule-based mutator has no new rules");
            return Vec::new();
        }

        vec![format!(
            "{}\n\n{}\n{}\n",
            prompt.trim_end(),
            REFINEMENTS_HEADER,
            new_rules.join("\n")
        )]
    }
}

/// Asks the completion model to rewrite the prompt given its failures.
///
/// A provider failure ends proposal generation; whatever was produced
/// before the failure is returned, nothing is invented in its place.
pub struct ModelAssistedMutator {
    completer: Arc<dyn Completer>,
    proposals: usize,
    max_tokens: u32,
    max_examples: usize,
}

impl ModelAssistedMutator {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            proposals: 2,
            max_tokens: 512,
            max_examples: 8,
        }
    }

    pub fn with_proposals(mut self, proposals: usize) -> Self {
        self.proposals = proposals;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Instruction sent to the model.
    pub fn reflection_prompt(&self, prompt: &str, trace: &CandidateTrace<'_>) -> String {
        let mut out = String::new();
        out.push_str(
            "You are improving the instruction given to a text classifier.\n\n\
             Current instruction:\n<<<\n",
        );
        out.push_str(prompt.trim());
        out.push_str("\n>>>\n\n");

        let failures: Vec<_> = trace.failures().take(self.max_examples).collect();
        if failures.is_empty() {
            out.push_str("The instruction answered every labelled case correctly.\n");
        } else {
            out.push_str("Cases it answered incorrectly:\n");
            for f in failures {
                out.push_str(&format!(
                    "- Input: {}\n  Expected: {}\n  Got: {}\n",
                    f.case.query.trim(),
                    f.case.gold.as_deref().unwrap_or_default().trim(),
                    f.result.text.trim()
                ));
            }
        }
        out.push_str(
            "\nWrite an improved instruction that keeps what works and fixes the errors. \
             Return only the instruction text.",
        );
        out
    }
}

#[async_trait]
impl PromptMutator for ModelAssistedMutator {
    fn name(&self) -> &'static str {
        "model_assisted"
    }

    async fn propose(&self, prompt: &str, trace: CandidateTrace<'_>) -> Vec<String> {
        let request = self.reflection_prompt(prompt, &trace);
        let mut proposals: Vec<String> = Vec::new();

        for _ in 0..self.proposals {
            match self.completer.generate(&request, self.max_tokens).await {
                Ok(result) => {
                    let text = result.text.trim();
                    let fresh = !text.is_empty()
                        && text != prompt.trim()
                        && !proposals.iter().any(|p| p == text);
                    if fresh {
                        proposals.push(text.to_string());
                    }
                }
                Err(err) => {
                    warn!(error = %err, "model-assisted mutation failed");
                    break;
                }
            }
        }
        proposals
    }
}
