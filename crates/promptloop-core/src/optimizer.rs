//! Evolutionary driver
//!
//! Runs the generation loop:
//! - evaluate every not-yet-scored prompt across the full case set
//! - keep the Pareto front of the generation's scored candidates
//! - ask the mutator for revisions of each front member
//! - carry front members (optionally) and new offspring into the next generation
//!
//! The final generation is evaluated and selected but not mutated; the
//! champion is the lexicographic maximum of its front.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::adapter::Completer;
use crate::config::RunConfig;
use crate::counters::{CounterSnapshot, RunCounters};
use crate::domain::{
    AdapterError, CallResult, CandidateFailure, CandidateTrace, CaseSet, ConfigError,
    EvaluationCase, GenerationRecord, MetricVector, OptimizeError, PopulationEntry,
    ScoredCandidate, Trace,
};
use crate::metrics::MetricSuite;
use crate::mutator::PromptMutator;
use crate::obs;
use crate::pareto::{pareto_front, select_champion};
use crate::sink::{GenerationTelemetry, TelemetrySink};

/// Cooperative cancellation signal, checked before every case evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Driver state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Seed,
    Evaluating,
    Selecting,
    Mutating,
    Terminated,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub champion: String,
    pub champion_scores: MetricVector,
    pub trace: Trace,
    pub counters: CounterSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A member of the working pool between generations.
enum Member {
    Pending(String),
    Scored(ScoredCandidate),
}

impl Member {
    fn prompt(&self) -> &str {
        match self {
            Member::Pending(p) => p,
            Member::Scored(c) => &c.prompt,
        }
    }
}

/// Orchestrates evaluation, selection and mutation over generations.
pub struct Optimizer {
    config: RunConfig,
    cases: CaseSet,
    completer: Arc<dyn Completer>,
    metrics: MetricSuite,
    mutator: Arc<dyn PromptMutator>,
    sinks: Vec<Arc<dyn TelemetrySink>>,
    counters: Arc<RunCounters>,
    cancel: CancelFlag,
    run_id: String,
}

impl Optimizer {
    /// Build a driver. Fails when the configuration is invalid or the case
    /// set is empty.
    pub fn new(
        config: RunConfig,
        cases: Vec<EvaluationCase>,
        completer: Arc<dyn Completer>,
        mutator: Arc<dyn PromptMutator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if cases.is_empty() {
            return Err(ConfigError::Invalid(
                "evaluation case set must not be empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            cases: cases.into(),
            completer,
            metrics: MetricSuite::default(),
            mutator,
            sinks: Vec::new(),
            counters: Arc::new(RunCounters::new()),
            cancel: CancelFlag::new(),
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_metrics(mut self, metrics: MetricSuite) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share counters with other components (typically the call adapter).
    pub fn with_counters(mut self, counters: Arc<RunCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cases(&self) -> &[EvaluationCase] {
        &self.cases
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    /// Evolve `seed_prompt` for `generations` generations and return the
    /// champion together with the full trace.
    pub async fn run(
        &self,
        seed_prompt: &str,
        generations: usize,
    ) -> Result<RunOutcome, OptimizeError> {
        let span = obs::run_span(&self.run_id);
        async {
            let started = Instant::now();
            obs::emit_run_started(&self.run_id, generations, self.cases.len());

            let result = self.evolve(seed_prompt, generations).await;

            let success = result.is_ok();
            let completed = match &result {
                Ok(outcome) => outcome.trace.len(),
                Err(OptimizeError::EmptyFront { generation, .. })
                | Err(OptimizeError::Cancelled { generation }) => *generation,
                Err(_) => 0,
            };
            obs::emit_run_finished(
                &self.run_id,
                started.elapsed().as_millis() as u64,
                completed,
                success,
            );
            self.counters.flush(&self.run_id);
            result
        }
        .instrument(span)
        .await
    }

    async fn evolve(
        &self,
        seed_prompt: &str,
        generations: usize,
    ) -> Result<RunOutcome, OptimizeError> {
        let started_at = Utc::now();
        if generations == 0 {
            return Err(ConfigError::Invalid("generations must be at least 1".to_string()).into());
        }
        if seed_prompt.trim().is_empty() {
            return Err(ConfigError::Invalid("seed prompt must not be empty".to_string()).into());
        }

        let mut phase = Phase::Seed;
        let mut pool = vec![Member::Pending(seed_prompt.to_string())];
        let mut trace = Trace::new();
        let mut final_front: Vec<ScoredCandidate> = Vec::new();

        for generation in 0..generations {
            let last = generation + 1 == generations;

            phase = self.transition(phase, Phase::Evaluating, generation);
            let (population, failures) = self.evaluate_pool(generation, pool).await?;
            if population.is_empty() {
                return Err(OptimizeError::EmptyFront {
                    generation,
                    failed: failures.len(),
                });
            }

            phase = self.transition(phase, Phase::Selecting, generation);
            let aggregates: Vec<MetricVector> = population.iter().map(|c| c.aggregate).collect();
            let front_idx = pareto_front(&aggregates);
            if front_idx.is_empty() {
                return Err(OptimizeError::EmptyFront {
                    generation,
                    failed: failures.len(),
                });
            }
            let front: Vec<ScoredCandidate> =
                front_idx.iter().map(|&i| population[i].clone()).collect();
            let best = select_champion(&aggregates, &front_idx).map(|i| aggregates[i]);
            obs::emit_generation_evaluated(
                generation,
                population.len(),
                front.len(),
                failures.len(),
                best.as_ref(),
            );

            let (next_pool, offspring) = if last {
                (Vec::new(), Vec::new())
            } else {
                phase = self.transition(phase, Phase::Mutating, generation);
                let proposals = self.mutate(generation, &front).await?;
                self.next_pool(&front, proposals)
            };

            let record = GenerationRecord {
                index: generation,
                parents: front.iter().map(|c| c.prompt.clone()).collect(),
                offspring,
                front: front.clone(),
                population: population
                    .iter()
                    .map(|c| PopulationEntry {
                        prompt: c.prompt.clone(),
                        aggregate: c.aggregate,
                    })
                    .collect(),
                failures,
            };
            self.publish(&record);
            trace.append(record);

            pool = next_pool;
            final_front = front;
        }
        self.transition(phase, Phase::Terminated, generations - 1);

        let points: Vec<MetricVector> = final_front.iter().map(|c| c.aggregate).collect();
        let all: Vec<usize> = (0..points.len()).collect();
        let champion_idx = select_champion(&points, &all).ok_or(OptimizeError::EmptyFront {
            generation: generations - 1,
            failed: 0,
        })?;
        let champion = &final_front[champion_idx];

        Ok(RunOutcome {
            run_id: self.run_id.clone(),
            champion: champion.prompt.clone(),
            champion_scores: champion.aggregate,
            trace,
            counters: self.counters.snapshot(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn transition(&self, from: Phase, to: Phase, generation: usize) -> Phase {
        debug!(from = ?from, to = ?to, generation = generation, "phase transition");
        to
    }

    /// Score every pending member; already-scored members pass through.
    async fn evaluate_pool(
        &self,
        generation: usize,
        pool: Vec<Member>,
    ) -> Result<(Vec<ScoredCandidate>, Vec<CandidateFailure>), OptimizeError> {
        let mut population = Vec::with_capacity(pool.len());
        let mut failures = Vec::new();

        for member in pool {
            let prompt = match member {
                Member::Scored(candidate) => {
                    population.push(candidate);
                    continue;
                }
                Member::Pending(prompt) => prompt,
            };
            match self.evaluate_prompt(&prompt).await {
                Ok(candidate) => {
                    self.counters.inc_candidates_evaluated();
                    population.push(candidate);
                }
                Err(AdapterError::Cancelled) => {
                    return Err(OptimizeError::Cancelled { generation });
                }
                Err(err) => {
                    self.counters.inc_candidates_failed();
                    obs::emit_candidate_failed(generation, &prompt, &err);
                    failures.push(CandidateFailure {
                        attempts: err.attempts(),
                        error: err.to_string(),
                        prompt,
                    });
                }
            }
        }
        Ok((population, failures))
    }

    /// Score one prompt across the whole case set.
    ///
    /// Cases run concurrently up to `case_concurrency`; the aggregate is only
    /// produced once every case has a result. The first failing case fails
    /// the whole candidate.
    pub async fn evaluate_prompt(&self, prompt: &str) -> Result<ScoredCandidate, AdapterError> {
        let max_tokens = self.config.max_tokens;
        let results: Vec<CallResult> = stream::iter(self.cases.iter())
            .map(|case| async move {
                if self.cancel.is_cancelled() {
                    return Err(AdapterError::Cancelled);
                }
                self.completer.complete(prompt, case, max_tokens).await
            })
            .buffered(self.config.case_concurrency.max(1))
            .try_collect()
            .await?;

        let per_case_scores: Vec<MetricVector> = self
            .cases
            .iter()
            .zip(results.iter())
            .map(|(case, result)| self.metrics.score(result, case))
            .collect();
        // The case set is non-empty by construction.
        let aggregate = MetricVector::mean(&per_case_scores).unwrap_or_default();

        Ok(ScoredCandidate {
            prompt: prompt.to_string(),
            per_case_results: results,
            per_case_scores,
            aggregate,
        })
    }

    /// Collect up to `children_per_parent` revisions for each front member.
    async fn mutate(
        &self,
        generation: usize,
        front: &[ScoredCandidate],
    ) -> Result<Vec<String>, OptimizeError> {
        let mut proposals = Vec::new();
        for parent in front {
            if self.cancel.is_cancelled() {
                return Err(OptimizeError::Cancelled { generation });
            }
            let children = self
                .mutator
                .propose(&parent.prompt, CandidateTrace::new(&self.cases, parent))
                .await;
            proposals.extend(
                children
                    .into_iter()
                    .filter(|child| child != &parent.prompt)
                    .take(self.config.children_per_parent),
            );
        }
        debug!(
            generation = generation,
            mutator = self.mutator.name(),
            proposals = proposals.len(),
            "mutation complete"
        );
        Ok(proposals)
    }

    /// Assemble the next pool: front members first (when kept), then new
    /// offspring, deduplicated by prompt text and capped at the population
    /// size. Returns the pool and the offspring actually admitted.
    fn next_pool(
        &self,
        front: &[ScoredCandidate],
        proposals: Vec<String>,
    ) -> (Vec<Member>, Vec<String>) {
        let cap = self.config.population_size;
        let mut seen: HashSet<String> = front.iter().map(|c| c.prompt.clone()).collect();
        let fresh: Vec<String> = proposals
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        let keep_parents = self.config.keep_parents || fresh.is_empty();
        let mut pool: Vec<Member> = if keep_parents {
            front.iter().cloned().map(Member::Scored).take(cap).collect()
        } else {
            Vec::new()
        };

        let room = cap.saturating_sub(pool.len());
        let offspring: Vec<String> = fresh.into_iter().take(room).collect();
        pool.extend(offspring.iter().cloned().map(Member::Pending));
        debug_assert!(unique_prompts(&pool));
        (pool, offspring)
    }

    /// Best-effort delivery to every sink. Failures are counted and logged.
    fn publish(&self, record: &GenerationRecord) {
        if self.sinks.is_empty() {
            return;
        }
        let telemetry = GenerationTelemetry::from_record(&self.run_id, record);
        for sink in &self.sinks {
            if let Err(err) = sink.emit(&telemetry) {
                self.counters.inc_telemetry_dropped();
                obs::emit_telemetry_dropped(record.index, &err);
            }
        }
    }
}

fn unique_prompts(pool: &[Member]) -> bool {
    let mut seen = HashSet::new();
    pool.iter().all(|m| seen.insert(m.prompt()))
}
