//! ProcessEngine integration tests against the mock runner binary
//!
//! Exercises the real wire protocol end to end: spawn + configure,
//! module discovery, runs with event forwarding, name-pattern
//! filtering, and cooperative cancellation.

use std::path::PathBuf;

use tokio::sync::mpsc;

use storyrun::common::config::{ResolvedRunner, Timeouts};
use storyrun::engine::{
    CancelToken, EngineEvent, ModuleSpec, ProcessEngine, RunConfig, RunStatus, TestEngine,
};

fn mock_runner(specs: &[&str]) -> ResolvedRunner {
    let mut args = Vec::new();
    for spec in specs {
        args.push("--spec".to_string());
        args.push(format!("storybook:{}", spec));
    }
    ResolvedRunner {
        path: PathBuf::from(env!("CARGO_BIN_EXE_mock_runner")),
        args,
        project: "storybook".to_string(),
    }
}

fn timeouts() -> Timeouts {
    Timeouts {
        engine_start_secs: 10,
        engine_request_secs: 10,
    }
}

fn no_coverage() -> RunConfig {
    RunConfig {
        watch_mode: false,
        coverage: false,
        a11y: false,
    }
}

async fn spawn(
    specs: &[&str],
) -> (ProcessEngine, mpsc::UnboundedReceiver<EngineEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = ProcessEngine::spawn(&mock_runner(specs), no_coverage(), events_tx, timeouts())
        .await
        .expect("spawn mock runner");
    (engine, events_rx)
}

#[tokio::test]
async fn glob_discovers_the_configured_specs() {
    let (mut engine, _events) = spawn(&[
        "/proj/src/Button.stories.tsx",
        "/proj/src/Card.stories.tsx",
    ])
    .await;

    let specs = engine.glob_test_specs().await.unwrap();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].project, "storybook");
    assert_eq!(
        specs[0].module_id,
        PathBuf::from("/proj/src/Button.stories.tsx")
    );

    engine.close().await.unwrap();
}

#[tokio::test]
async fn run_reports_outcome_and_forwards_events() {
    let (mut engine, mut events) = spawn(&[
        "/proj/src/Button.stories.tsx",
        "/proj/src/Card.stories.tsx",
    ])
    .await;

    let specs = engine.glob_test_specs().await.unwrap();
    let cancel = CancelToken::new();
    let outcome = engine.run_files(&specs, true, &cancel).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Passed);
    assert_eq!(outcome.passed, 2);
    assert_eq!(outcome.failed, 0);

    engine.close().await.unwrap();

    let mut saw_started = false;
    let mut saw_progress = false;
    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::RunStarted { total } => {
                assert_eq!(total, 2);
                saw_started = true;
            }
            EngineEvent::TestProgress(progress) => {
                assert_eq!(progress.total, 2);
                saw_progress = true;
            }
            EngineEvent::RunFinished(finished) => {
                assert_eq!(finished.passed, 2);
                saw_finished = true;
            }
        }
    }
    assert!(saw_started && saw_progress && saw_finished);
}

#[tokio::test]
async fn name_pattern_restricts_the_run() {
    let (mut engine, _events) = spawn(&[
        "/proj/src/Button.stories.tsx",
        "/proj/src/Card.stories.tsx",
    ])
    .await;

    engine.set_name_pattern(Some("^Button$")).await.unwrap();
    let specs = engine.glob_test_specs().await.unwrap();
    let cancel = CancelToken::new();
    let outcome = engine.run_files(&specs, true, &cancel).await.unwrap();

    assert_eq!(outcome.passed, 1);
    assert_eq!(outcome.skipped, 1);

    // clearing the filter restores the full run
    engine.set_name_pattern(None).await.unwrap();
    let outcome = engine.run_files(&specs, true, &cancel).await.unwrap();
    assert_eq!(outcome.passed, 2);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn failing_module_fails_the_run() {
    let (mut engine, _events) = spawn(&[
        "/proj/src/Button.stories.tsx",
        "/proj/src/failing.stories.tsx",
    ])
    .await;

    let specs = engine.glob_test_specs().await.unwrap();
    let cancel = CancelToken::new();
    let outcome = engine.run_files(&specs, true, &cancel).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.passed, 1);
    assert_eq!(outcome.failed, 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn cancellation_is_acknowledged_with_a_cancelled_outcome() {
    // a "slow" module blocks inside the engine until cancel arrives
    let (mut engine, _events) = spawn(&["/proj/src/slow.stories.tsx"]).await;

    let specs = engine.glob_test_specs().await.unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = engine.run_files(&specs, true, &cancel).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.skipped, 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn watch_and_invalidate_round_trip() {
    let (mut engine, _events) = spawn(&["/proj/src/Button.stories.tsx"]).await;

    engine.set_watch_mode(true).await.unwrap();
    engine.set_watch_mode(false).await.unwrap();
    engine.invalidate().await.unwrap();

    let specs = engine.glob_test_specs().await.unwrap();
    assert_eq!(
        specs,
        vec![ModuleSpec {
            project: "storybook".to_string(),
            module_id: PathBuf::from("/proj/src/Button.stories.tsx"),
        }]
    );

    engine.close().await.unwrap();
}
