//! End-to-end optimization runs over scripted completers.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use common::{five_cases, BrokenSink, MemorySink, OracleCompleter, ScriptedProvider};
use promptloop_core::{
    read_run_artifact, write_champion, write_run_artifact, CallAdapter, CallResult, CancelFlag,
    CandidateTrace, JsonlSink, OptimizeError, Optimizer, PromptMutator, RetryPolicy,
    RuleBasedMutator, RunArtifact, RunConfig,
};

const SEED: &str = "Answer the question.";

/// Proposes one healthy and one broken child per parent.
struct ForkMutator;

#[async_trait]
impl PromptMutator for ForkMutator {
    fn name(&self) -> &'static str {
        "fork"
    }

    async fn propose(&self, prompt: &str, _trace: CandidateTrace<'_>) -> Vec<String> {
        vec![
            format!("{prompt}\n\nRefinements:\n- Be exact."),
            format!("{prompt} BROKEN"),
        ]
    }
}

fn optimizer(completer: Arc<OracleCompleter>) -> Optimizer {
    Optimizer::new(
        RunConfig::default(),
        five_cases(),
        completer,
        Arc::new(RuleBasedMutator),
    )
    .unwrap()
}

#[tokio::test]
async fn test_two_generations_yield_champion_in_final_front() {
    let opt = optimizer(Arc::new(OracleCompleter::new()));
    let outcome = opt.run(SEED, 2).await.unwrap();

    assert_eq!(outcome.trace.len(), 2);
    let last = outcome.trace.last().unwrap();
    assert_eq!(last.index, 1);
    assert!(last.front_contains(&outcome.champion));
    assert!(outcome.trace.in_any_front(&outcome.champion));

    // the refined child answers every case correctly and beats the seed
    assert_ne!(outcome.champion, SEED);
    assert!(outcome.champion.contains("Prefer exact string: `Paris`"));
    assert_eq!(outcome.champion_scores.exact, 1.0);

    let first = &outcome.trace.records()[0];
    assert_eq!(first.parents, vec![SEED.to_string()]);
    assert_eq!(first.offspring.len(), 1);
    assert!(last.offspring.is_empty());
}

#[tokio::test]
async fn test_champion_and_trace_artifacts_written() {
    let dir = tempfile::tempdir().unwrap();
    let opt = optimizer(Arc::new(OracleCompleter::new()));
    let outcome = opt.run(SEED, 2).await.unwrap();

    let champion_path = dir.path().join("champion.txt");
    write_champion(&outcome.champion, &champion_path).unwrap();
    assert_eq!(
        std::fs::read_to_string(&champion_path).unwrap(),
        outcome.champion
    );

    let artifact = RunArtifact::from_outcome(&outcome, opt.config()).unwrap();
    write_run_artifact(&artifact, dir.path()).unwrap();
    let loaded = read_run_artifact(&outcome.run_id, dir.path()).unwrap();
    assert_eq!(loaded.trace, outcome.trace);
    assert_eq!(loaded.champion, outcome.champion);
}

#[tokio::test]
async fn test_all_candidates_failing_is_empty_front() {
    let opt = optimizer(Arc::new(OracleCompleter::failing_on("")));
    match opt.run(SEED, 2).await {
        Err(OptimizeError::EmptyFront { generation, failed }) => {
            assert_eq!(generation, 0);
            assert_eq!(failed, 1);
        }
        other => panic!("expected EmptyFront, got {:?}", other.map(|o| o.champion)),
    }
    assert_eq!(opt.counters().snapshot().candidates_failed, 1);
}

#[tokio::test]
async fn test_failed_candidate_is_dropped_and_recorded() {
    let opt = Optimizer::new(
        RunConfig::default(),
        five_cases(),
        Arc::new(OracleCompleter::failing_on("BROKEN")),
        Arc::new(ForkMutator),
    )
    .unwrap();
    let outcome = opt.run(SEED, 2).await.unwrap();

    let second = &outcome.trace.records()[1];
    assert_eq!(second.failures.len(), 1);
    assert!(second.failures[0].prompt.ends_with("BROKEN"));
    assert_eq!(second.failures[0].attempts, 4);
    assert!(second.population.iter().all(|p| !p.prompt.contains("BROKEN")));
    assert!(!outcome.champion.contains("BROKEN"));
    assert!(second.front_contains(&outcome.champion));
}

#[tokio::test]
async fn test_telemetry_failure_never_alters_outcome() {
    let broken = Arc::new(BrokenSink::new());
    let baseline = optimizer(Arc::new(OracleCompleter::new()))
        .run(SEED, 2)
        .await
        .unwrap();

    let opt = optimizer(Arc::new(OracleCompleter::new())).with_sink(broken.clone());
    let outcome = opt.run(SEED, 2).await.unwrap();

    assert_eq!(outcome.champion, baseline.champion);
    assert_eq!(outcome.trace, baseline.trace);
    assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.counters.telemetry_dropped, 2);
}

#[tokio::test]
async fn test_one_telemetry_record_per_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let memory = Arc::new(MemorySink::default());
    let opt = optimizer(Arc::new(OracleCompleter::new()))
        .with_run_id("run-telemetry")
        .with_sink(memory.clone())
        .with_sink(Arc::new(JsonlSink::open(&path).unwrap()));
    opt.run(SEED, 3).await.unwrap();

    let records = memory.records.lock().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(
        records.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(records.iter().all(|r| r.run_id == "run-telemetry"));
    assert_eq!(records[0].scores.len(), 1);

    let lines = std::fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().count(), 3);
}

#[tokio::test]
async fn test_cancellation_between_cases_aborts_run() {
    let flag = CancelFlag::new();
    let completer = Arc::new(OracleCompleter::cancelling_after(3, flag.clone()));
    let opt = Optimizer::new(
        RunConfig {
            case_concurrency: 1,
            ..RunConfig::default()
        },
        five_cases(),
        completer.clone(),
        Arc::new(RuleBasedMutator),
    )
    .unwrap()
    .with_cancel_flag(flag);

    assert!(matches!(
        opt.run(SEED, 2).await,
        Err(OptimizeError::Cancelled { generation: 0 })
    ));
    assert_eq!(completer.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_through_call_adapter_survives_rate_limits() {
    let mut script = vec![common::rate_limited(), common::rate_limited()];
    script.extend((0..20).map(|_| Ok(CallResult::new("4", vec![-0.3]))));
    let provider = Arc::new(ScriptedProvider::new(script));

    let config = RunConfig::default();
    let opt = Optimizer::new(
        config.clone(),
        five_cases(),
        Arc::new(CallAdapter::new(provider.clone(), RetryPolicy::from_config(&config))),
        Arc::new(RuleBasedMutator),
    )
    .unwrap();
    let outcome = opt.run(SEED, 1).await.unwrap();

    assert_eq!(outcome.champion, SEED);
    assert!(outcome.trace.records()[0].failures.is_empty());
    // five cases plus two retried attempts
    assert_eq!(provider.calls(), 7);
}
