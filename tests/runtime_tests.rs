//! Integration tests for the runtime adapter against an in-memory engine

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use common::{drain, frame, FakeEngine};
use dockerina::docker::models::{ErrorDetail, ExecInspect, PullFrame};
use dockerina::docker::{EngineError, ExecOutput, RuntimeAdapter};
use dockerina::jobs::{
    JobKind, JobOutcome, JobSignal, JobStatus, ProgressDetail, ProgressStore, PullPhase,
};

fn adapter(engine: FakeEngine, timeout: Duration) -> (RuntimeAdapter, Arc<FakeEngine>) {
    let engine = Arc::new(engine);
    let store = Arc::new(ProgressStore::default());
    (
        RuntimeAdapter::new(engine.clone(), store, timeout),
        engine,
    )
}

/// Pull job from first frame to final value
#[tokio::test]
async fn test_pull_end_to_end() {
    let (runtime, _) = adapter(
        FakeEngine::pulling(vec![
            PullFrame::progress("Downloading", "layerA", 10, 100),
            PullFrame::status("Pull complete", Some("layerA")),
        ]),
        Duration::from_secs(30),
    );
    let store = runtime.store().clone();

    let job = runtime.pull_image("x:latest", None);
    assert_eq!(job.kind, JobKind::ImagePull);
    let subscription = store.subscribe(&job.id).unwrap();

    let signals = drain(subscription).await;
    assert_eq!(signals.len(), 3, "one signal per event plus the terminal");

    match &signals[0] {
        JobSignal::Progress(event) => match &event.detail {
            Some(ProgressDetail::Pull(detail)) => {
                assert_eq!(detail.phase, PullPhase::Downloading);
                assert_eq!(detail.percent, Some(10));
            }
            other => panic!("unexpected detail: {:?}", other),
        },
        other => panic!("unexpected signal: {:?}", other),
    }
    assert_eq!(
        signals[2],
        JobSignal::Terminal(JobOutcome::Succeeded(
            json!({"ref": "x:latest", "status": "downloaded"})
        ))
    );

    let snapshot = store.get(&job.id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Succeeded);
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.last, snapshot.history.last().cloned());
    assert_eq!(
        snapshot.final_value,
        Some(json!({"ref": "x:latest", "status": "downloaded"}))
    );
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.meta["ref"], "x:latest");
}

/// An error frame from the engine fails the job
#[tokio::test]
async fn test_pull_error_frame_fails_job() {
    let (runtime, _) = adapter(
        FakeEngine::pulling(vec![
            PullFrame::status("Pulling fs layer", Some("l1")),
            PullFrame {
                error: Some("unauthorized".to_string()),
                error_detail: Some(ErrorDetail {
                    message: Some("unauthorized: authentication required".to_string()),
                }),
                ..Default::default()
            },
        ]),
        Duration::from_secs(30),
    );
    let store = runtime.store().clone();

    let job = runtime.pull_image("private/x", None);
    let signals = drain(store.subscribe(&job.id).unwrap()).await;

    match signals.last() {
        Some(JobSignal::Terminal(JobOutcome::Failed(error))) => {
            assert_eq!(error.message, "unauthorized: authentication required");
            assert_eq!(error.name.as_deref(), Some("PullError"));
        }
        other => panic!("unexpected signal: {:?}", other),
    }

    let snapshot = store.get(&job.id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.final_value.is_none());
}

/// The engine refusing the pull fails the job with the engine error
#[tokio::test]
async fn test_pull_rejected_by_engine() {
    let engine = FakeEngine::default();
    *engine.pull_error.lock().unwrap() = Some(EngineError::Api {
        status: 404,
        message: "pull access denied".to_string(),
    });
    let (runtime, _) = adapter(engine, Duration::from_secs(30));
    let store = runtime.store().clone();

    let job = runtime.pull_image("nope", None);
    let signals = drain(store.subscribe(&job.id).unwrap()).await;

    match signals.as_slice() {
        [JobSignal::Terminal(JobOutcome::Failed(error))] => {
            assert_eq!(error.name.as_deref(), Some("ApiError"));
            assert!(error.message.contains("pull access denied"));
        }
        other => panic!("unexpected signals: {:?}", other),
    }
}

/// A broken stream mid-pull fails the job
#[tokio::test]
async fn test_pull_stream_error_fails_job() {
    let engine = FakeEngine::default();
    *engine.pull_frames.lock().unwrap() = vec![
        Ok(PullFrame::progress("Downloading", "l1", 1, 10)),
        Err(EngineError::Stream("connection reset".to_string())),
    ];
    let (runtime, _) = adapter(engine, Duration::from_secs(30));
    let store = runtime.store().clone();

    let job = runtime.pull_image("alpine", None);
    let signals = drain(store.subscribe(&job.id).unwrap()).await;

    assert_eq!(signals.len(), 2);
    match &signals[1] {
        JobSignal::Terminal(JobOutcome::Failed(error)) => {
            assert_eq!(error.name.as_deref(), Some("StreamError"));
        }
        other => panic!("unexpected signal: {:?}", other),
    }
}

/// Output frames split across reads are reassembled per stream
#[tokio::test]
async fn test_exec_demuxes_output() {
    let mut bytes = frame(1, b"hello\n");
    bytes.extend(frame(2, b"oops\n"));
    bytes.extend(frame(1, b"world\n"));
    let (head, tail) = bytes.split_at(11);

    let (runtime, engine) = adapter(
        FakeEngine::executing(vec![head.to_vec(), tail.to_vec()], Some(3)),
        Duration::from_secs(30),
    );

    let output = runtime
        .exec_container("web", &["sh".to_string(), "-c".to_string(), "x".to_string()])
        .await
        .unwrap();

    assert_eq!(
        output,
        ExecOutput {
            exit_code: Some(3),
            stdout: "hello\nworld\n".to_string(),
            stderr: "oops\n".to_string(),
            timed_out: false,
        }
    );
    assert_eq!(engine.inspect_calls(), 1);
}

/// A silent command is cut off at the timeout without hanging
#[tokio::test(start_paused = true)]
async fn test_exec_timeout_returns_promptly() {
    let mut engine = FakeEngine::executing(vec![], Some(0));
    engine.exec_hangs = true;
    let (runtime, engine) = adapter(engine, Duration::from_millis(100));

    let started = Instant::now();
    let output = runtime
        .exec_container("web", &["sleep".to_string(), "60".to_string()])
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(output.timed_out);
    assert_eq!(output.exit_code, None);
    assert!(output.stdout.is_empty());
    assert!(output.stderr.is_empty());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
    assert_eq!(engine.inspect_calls(), 0);
}

/// Output produced before the timeout is kept
#[tokio::test(start_paused = true)]
async fn test_exec_timeout_keeps_partial_output() {
    let mut engine = FakeEngine::executing(vec![frame(1, b"partial")], None);
    engine.exec_hangs = true;
    let (runtime, _) = adapter(engine, Duration::from_millis(100));

    let output = runtime
        .exec_container("web", &["tail".to_string(), "-f".to_string()])
        .await
        .unwrap();

    assert!(output.timed_out);
    assert_eq!(output.stdout, "partial");
}

/// An exit code that never shows up is polled a bounded number of times
#[tokio::test(start_paused = true)]
async fn test_exec_exit_code_poll_is_bounded() {
    let mut engine = FakeEngine::executing(vec![frame(1, b"ok\n")], None);
    engine.inspect = ExecInspect {
        exit_code: None,
        running: true,
    };
    let (runtime, engine) = adapter(engine, Duration::from_secs(30));

    let output = runtime
        .exec_container("web", &["true".to_string()])
        .await
        .unwrap();

    assert!(!output.timed_out);
    assert_eq!(output.exit_code, None);
    assert_eq!(engine.inspect_calls(), 10);
}

/// Tracked exec reports output progress and settles with the output
#[tokio::test]
async fn test_tracked_exec() {
    let (runtime, _) = adapter(
        FakeEngine::executing(vec![frame(1, b"line 1\nline 2\n"), frame(2, b"warn\n")], Some(0)),
        Duration::from_secs(30),
    );
    let store = runtime.store().clone();

    let job = runtime.exec_container_tracked("web", vec!["make".to_string()]);
    assert_eq!(job.kind, JobKind::Exec);
    let signals = drain(store.subscribe(&job.id).unwrap()).await;

    assert_eq!(signals.len(), 3);
    match &signals[1] {
        JobSignal::Progress(event) => match &event.detail {
            Some(ProgressDetail::Exec(detail)) => {
                assert_eq!(detail.bytes_out, 14);
                assert_eq!(detail.bytes_err, 5);
                assert_eq!(detail.stdout_tail.as_deref(), Some("line 1\nline 2"));
                assert_eq!(detail.stderr_tail.as_deref(), Some("warn"));
            }
            other => panic!("unexpected detail: {:?}", other),
        },
        other => panic!("unexpected signal: {:?}", other),
    }

    match &signals[2] {
        JobSignal::Terminal(JobOutcome::Succeeded(value)) => {
            let output: ExecOutput = serde_json::from_value(value.clone()).unwrap();
            assert_eq!(output.exit_code, Some(0));
            assert_eq!(output.stdout, "line 1\nline 2\n");
            assert_eq!(output.stderr, "warn\n");
        }
        other => panic!("unexpected signal: {:?}", other),
    }

    let snapshot = store.get(&job.id).unwrap();
    assert_eq!(snapshot.meta["container"], "web");
    assert_eq!(snapshot.meta["cmd"], json!(["make"]));
}
