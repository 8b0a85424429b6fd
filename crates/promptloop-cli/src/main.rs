//! promptloop - prompt evolution and confidence routing CLI
//!
//! ## Commands
//!
//! - `optimize`: Evolve a seed prompt over an evaluation case file
//! - `eval`: Score one prompt across a case file
//! - `calibrate`: Pick a routing threshold from labelled eval records
//! - `route`: Answer one query and decide whether to escalate it

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use promptloop_core::router::{read_calibration_samples, write_calibration_samples};
use promptloop_core::{
    exact_match, load_cases, write_champion, write_run_artifact, CalibrationFile,
    CalibrationSample, CallAdapter, CancelFlag, Completer, ConfidenceRouter, EvaluationCase,
    GroundingKind, JsonlSink, MetricSuite, MetricVector, ModelAssistedMutator, MutatorKind,
    Optimizer, PromptMutator, RetryPolicy, RuleBasedMutator, RunArtifact, RunConfig,
    RunCounters, TogetherProvider, TracingSink,
};

#[derive(Parser)]
#[command(name = "promptloop")]
#[command(author = "Stevedores Org")]
#[command(version = promptloop_core::VERSION)]
#[command(about = "Multi-objective prompt evolution with confidence routing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evolve a seed prompt and write the champion
    Optimize {
        /// Newline-delimited JSON evaluation cases
        #[arg(short, long)]
        cases: PathBuf,

        /// Seed prompt text
        #[arg(long, conflicts_with = "seed_file", required_unless_present = "seed_file")]
        seed: Option<String>,

        /// File containing the seed prompt
        #[arg(long)]
        seed_file: Option<PathBuf>,

        /// Number of generations (overrides PROMPTLOOP_GENERATIONS)
        #[arg(short, long)]
        generations: Option<usize>,

        /// Population cap (overrides PROMPTLOOP_POPULATION_SIZE)
        #[arg(long)]
        population: Option<usize>,

        /// Mutation strategy: rule or model
        #[arg(long, env = "PROMPTLOOP_MUTATOR", default_value = "rule")]
        mutator: MutatorKind,

        /// Grounding scorer: lexical or entailment
        #[arg(long, env = "PROMPTLOOP_GROUNDING", default_value = "lexical")]
        grounding: GroundingKind,

        /// Where to write the champion prompt
        #[arg(short, long, default_value = "champion.txt")]
        output: PathBuf,

        /// Root directory for run trace artifacts
        #[arg(long, default_value = ".promptloop/runs")]
        artifacts_dir: PathBuf,

        /// Append per-generation telemetry to this JSONL file
        #[arg(long)]
        telemetry: Option<PathBuf>,
    },

    /// Score a prompt across a case file
    Eval {
        /// Newline-delimited JSON evaluation cases
        #[arg(short, long)]
        cases: PathBuf,

        /// File containing the prompt to score
        #[arg(short, long)]
        prompt_file: PathBuf,

        /// Grounding scorer: lexical or entailment
        #[arg(long, env = "PROMPTLOOP_GROUNDING", default_value = "lexical")]
        grounding: GroundingKind,

        /// Write calibration records ({token_logprobs, correct}) as JSONL
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Choose a routing threshold from eval records
    Calibrate {
        /// JSONL records written by `eval --records`
        #[arg(short, long)]
        records: PathBuf,

        /// Where to write the calibration file
        #[arg(short, long, default_value = "calibration.json")]
        output: PathBuf,

        /// Also store a score table with this many equal-count bins
        #[arg(long)]
        bins: Option<usize>,

        /// Bins whose accuracy falls below this escalate
        #[arg(long, default_value_t = 0.5)]
        min_accuracy: f64,
    },

    /// Answer a query with a prompt and decide whether to escalate
    Route {
        /// File containing the serving prompt (usually the champion)
        #[arg(short, long)]
        prompt_file: PathBuf,

        /// The live query
        #[arg(short, long)]
        query: String,

        /// Calibration file; takes precedence over the configured threshold
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Escalation threshold on the summed log-probability
        #[arg(long, env = "PROMPTLOOP_CONFIDENCE_THRESHOLD")]
        threshold: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    promptloop_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Optimize {
            cases,
            seed,
            seed_file,
            generations,
            population,
            mutator,
            grounding,
            output,
            artifacts_dir,
            telemetry,
        } => {
            let seed = match (seed, seed_file) {
                (Some(seed), _) => seed,
                (None, Some(path)) => read_text(&path)?,
                (None, None) => anyhow::bail!("either --seed or --seed-file is required"),
            };
            let mut config = RunConfig::from_env().context("Invalid PROMPTLOOP_* configuration")?;
            if let Some(g) = generations {
                config = config.with_generations(g);
            }
            if let Some(p) = population {
                config = config.with_population_size(p);
            }
            cmd_optimize(
                config,
                &cases,
                &seed,
                mutator,
                grounding,
                &output,
                &artifacts_dir,
                telemetry.as_deref(),
            )
            .await
        }
        Commands::Eval {
            cases,
            prompt_file,
            grounding,
            records,
        } => cmd_eval(&cases, &prompt_file, grounding, records.as_deref()).await,
        Commands::Calibrate {
            records,
            output,
            bins,
            min_accuracy,
        } => cmd_calibrate(&records, &output, bins, min_accuracy),
        Commands::Route {
            prompt_file,
            query,
            calibration,
            threshold,
        } => cmd_route(&prompt_file, &query, calibration.as_deref(), threshold).await,
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

/// Retrying adapter over the Together chat API. Fails fast when the
/// credential is missing.
fn build_completer(config: &RunConfig, counters: Arc<RunCounters>) -> Result<Arc<CallAdapter>> {
    let provider = TogetherProvider::from_env(config).context("Failed to configure provider")?;
    Ok(Arc::new(
        CallAdapter::new(Arc::new(provider), RetryPolicy::from_config(config))
            .with_counters(counters),
    ))
}

fn build_mutator(kind: MutatorKind, completer: Arc<dyn Completer>) -> Arc<dyn PromptMutator> {
    match kind {
        MutatorKind::RuleBased => Arc::new(RuleBasedMutator),
        MutatorKind::ModelAssisted => Arc::new(ModelAssistedMutator::new(completer)),
    }
}

/// Evolve a seed prompt, then write the champion and the run artifact
#[allow(clippy::too_many_arguments)]
async fn cmd_optimize(
    config: RunConfig,
    cases_path: &Path,
    seed: &str,
    mutator: MutatorKind,
    grounding: GroundingKind,
    output: &Path,
    artifacts_dir: &Path,
    telemetry: Option<&Path>,
) -> Result<()> {
    let cases = load_cases(cases_path)
        .with_context(|| format!("Failed to load cases from {:?}", cases_path))?;
    let counters = Arc::new(RunCounters::new());
    let completer = build_completer(&config, counters.clone())?;
    let generations = config.generations;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let mut optimizer = Optimizer::new(
        config.clone(),
        cases,
        completer.clone(),
        build_mutator(mutator, completer),
    )
    .context("Invalid run configuration")?
    .with_metrics(MetricSuite::with_kind(grounding))
    .with_counters(counters)
    .with_cancel_flag(cancel)
    .with_sink(Arc::new(TracingSink));
    if let Some(path) = telemetry {
        let sink = JsonlSink::open(path)
            .with_context(|| format!("Failed to open telemetry file {:?}", path))?;
        optimizer = optimizer.with_sink(Arc::new(sink));
    }

    let outcome = optimizer
        .run(seed, generations)
        .await
        .context("Optimization failed")?;

    write_champion(&outcome.champion, output)
        .with_context(|| format!("Failed to write champion to {:?}", output))?;
    let artifact = RunArtifact::from_outcome(&outcome, &config)?;
    let trace_path = write_run_artifact(&artifact, artifacts_dir)
        .with_context(|| format!("Failed to write run artifact under {:?}", artifacts_dir))?;

    info!(
        run_id = %outcome.run_id,
        exact = outcome.champion_scores.exact,
        grounding = outcome.champion_scores.grounding,
        logprob = outcome.champion_scores.logprob,
        "optimization complete"
    );
    println!("Champion written to {:?}", output);
    println!("Trace written to {:?}", trace_path);
    println!("Trace digest: {}", artifact.trace_digest);
    Ok(())
}

#[derive(Serialize)]
struct CaseReport<'a> {
    query: &'a str,
    answer: &'a str,
    scores: MetricVector,
}

#[derive(Serialize)]
struct EvalReport<'a> {
    prompt: &'a str,
    aggregate: MetricVector,
    cases: Vec<CaseReport<'a>>,
}

/// Score one prompt and optionally write calibration records
async fn cmd_eval(
    cases_path: &Path,
    prompt_file: &Path,
    grounding: GroundingKind,
    records: Option<&Path>,
) -> Result<()> {
    let prompt = read_text(prompt_file)?;
    let cases = load_cases(cases_path)
        .with_context(|| format!("Failed to load cases from {:?}", cases_path))?;
    let config = RunConfig::from_env().context("Invalid PROMPTLOOP_* configuration")?;
    let completer = build_completer(&config, Arc::new(RunCounters::new()))?;
    let optimizer = Optimizer::new(config, cases, completer, Arc::new(RuleBasedMutator))
        .context("Invalid run configuration")?
        .with_metrics(MetricSuite::with_kind(grounding));

    let scored = optimizer
        .evaluate_prompt(&prompt)
        .await
        .context("Evaluation failed")?;

    let report = EvalReport {
        prompt: &scored.prompt,
        aggregate: scored.aggregate,
        cases: optimizer
            .cases()
            .iter()
            .zip(scored.per_case_results.iter().zip(&scored.per_case_scores))
            .map(|(case, (result, scores))| CaseReport {
                query: &case.query,
                answer: &result.text,
                scores: *scores,
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = records {
        let samples = calibration_samples(optimizer.cases(), &scored.per_case_results);
        write_calibration_samples(&samples, path)
            .with_context(|| format!("Failed to write records to {:?}", path))?;
        println!("Wrote {} calibration records to {:?}", samples.len(), path);
    }
    Ok(())
}

/// One labelled sample per case that has a gold answer.
fn calibration_samples(
    cases: &[EvaluationCase],
    results: &[promptloop_core::CallResult],
) -> Vec<CalibrationSample> {
    cases
        .iter()
        .zip(results)
        .filter_map(|(case, result)| {
            let gold = case.gold.as_deref()?;
            Some(CalibrationSample {
                token_logprobs: result.token_logprobs.clone(),
                correct: exact_match(&result.text, Some(gold)) >= 1.0,
            })
        })
        .collect()
}

/// Sweep thresholds over labelled records and save the best one
fn cmd_calibrate(
    records: &Path,
    output: &Path,
    bins: Option<usize>,
    min_accuracy: f64,
) -> Result<()> {
    let samples = read_calibration_samples(records)
        .with_context(|| format!("Failed to read records from {:?}", records))?;
    if samples.is_empty() {
        warn!("no calibration records; falling back to the default threshold");
    }
    let mut calibration = CalibrationFile::from_samples(&samples);
    if let Some(bins) = bins {
        calibration = calibration
            .with_bins(&samples, bins, min_accuracy)
            .context("Invalid score table settings")?;
    }
    calibration
        .save(output)
        .with_context(|| format!("Failed to write calibration to {:?}", output))?;

    println!("Threshold: {:.3}", calibration.threshold);
    if let Some(acc) = calibration.accuracy {
        println!("Accuracy: {:.3} over {} samples", acc, calibration.samples);
    }
    if let Some(table) = calibration.bins.as_ref().filter(|t| !t.is_empty()) {
        println!("Score table: {} bins, min accuracy {:.2}", table.len(), min_accuracy);
    }
    println!("Calibration written to {:?}", output);
    Ok(())
}

/// Answer a live query and print the routing decision as JSON
async fn cmd_route(
    prompt_file: &Path,
    query: &str,
    calibration: Option<&Path>,
    threshold: Option<f64>,
) -> Result<()> {
    let prompt = read_text(prompt_file)?;
    let config = RunConfig::from_env().context("Invalid PROMPTLOOP_* configuration")?;
    let router = match (calibration, threshold) {
        (Some(path), _) => CalibrationFile::load(path)
            .with_context(|| format!("Failed to load calibration from {:?}", path))?
            .router(),
        (None, Some(t)) => ConfidenceRouter::threshold(t),
        (None, None) => ConfidenceRouter::threshold(config.confidence_threshold),
    };

    let completer = build_completer(&config, Arc::new(RunCounters::new()))?;
    let result = completer
        .complete(&prompt, &EvaluationCase::new(query), config.max_tokens)
        .await
        .context("Completion failed")?;

    let decision = router.route(&result);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
