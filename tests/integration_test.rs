//! Queue, worker and callback behaviour against stub model backends.
//!
//! Run with: cargo test --test integration_test

mod fixtures;
mod helpers;

use axum::http::StatusCode;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

use receipt_pipeline::config::AppConfig;
use receipt_pipeline::models::job::{JobInput, JobOutcome, JobStatus};
use receipt_pipeline::services::{submission, worker};

fn input(questions: Option<Vec<String>>) -> JobInput {
    JobInput {
        image: png_image(),
        questions,
    }
}

fn completed(outcome: &Option<JobOutcome>) -> &receipt_pipeline::models::receipt::PipelineResult {
    match outcome {
        Some(JobOutcome::Completed(result)) => result,
        other => panic!("expected a completed job, got {other:?}"),
    }
}

#[tokio::test]
async fn test_jobs_run_one_at_a_time_in_submission_order() {
    let tracker = Arc::new(Tracker::default());
    let state = build_state(
        AppConfig::default(),
        StubQa::slow(Duration::from_millis(30), tracker.clone()),
        StubDocs { fail: false },
        StubLlm::receipt(),
    );

    let ids: Vec<_> = (0..5)
        .map(|i| submission::submit(&state, input(Some(vec![format!("marker-{i}")])), None).unwrap())
        .collect();
    assert_eq!(state.queue.depth(), 5);
    assert_eq!(state.store.counts().queued, 5);

    let handle = worker::spawn(state.clone());
    for id in &ids {
        let job = wait_for_job(&state, *id).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    let expected: Vec<String> = (0..5).map(|i| format!("marker-{i}")).collect();
    assert_eq!(tracker.seen(), expected);
    assert_eq!(tracker.peak(), 1, "two jobs were processing at once");

    state.queue.close();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_completed_job_carries_normalized_receipt() {
    let state = default_state();
    let id = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    let job = wait_for_job(&state, id).await;
    let result = completed(&job.result);

    assert!(result.receipt_meta.is_none());
    assert_eq!(result.receipt.store_name.as_deref(), Some("Corner Market"));
    assert_eq!(result.receipt.total_amount, Some(1234.5));
    assert_eq!(result.receipt.received, Some(1300.0));
    assert_eq!(result.receipt.sales_tax, None);
    // Default question set, one answer each
    assert_eq!(result.raw_extraction_a.len(), 9);
    assert_eq!(result.raw_extraction_b["total"]["total_price"], "1,234.50");
}

#[tokio::test]
async fn test_both_extractors_failing_fails_the_job() {
    let state = build_state(
        AppConfig::default(),
        StubQa::failing(),
        StubDocs { fail: true },
        StubLlm::receipt(),
    );
    let id = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    let job = wait_for_job(&state, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    match job.result {
        Some(JobOutcome::Failed(reason)) => {
            assert!(reason.contains("layoutlm offline"), "{reason}");
            assert!(reason.contains("donut offline"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_extractor_failing_still_completes() {
    let state = build_state(
        AppConfig::default(),
        StubQa::ok(),
        StubDocs { fail: true },
        StubLlm::receipt(),
    );
    let id = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    let job = wait_for_job(&state, id).await;
    let result = completed(&job.result);
    assert!(result.raw_extraction_b.get("_error").is_some());
    assert_eq!(result.receipt.store_name.as_deref(), Some("Corner Market"));
}

#[tokio::test]
async fn test_normalizer_failure_falls_back_to_null_receipt() {
    let state = build_state(
        AppConfig::default(),
        StubQa::ok(),
        StubDocs { fail: false },
        StubLlm::unreachable(),
    );
    let id = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    let job = wait_for_job(&state, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let result = completed(&job.result);
    assert!(result.receipt.is_empty());
    let meta = result.receipt_meta.as_ref().expect("receipt_meta missing");
    assert!(meta.error.as_deref().unwrap_or_default().contains("connection refused"));
}

#[tokio::test]
async fn test_panicking_extractor_only_fails_its_own_job() {
    let state = default_state();
    let bad = submission::submit(&state, input(Some(vec!["panic".into()])), None).unwrap();
    let good = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    let bad = wait_for_job(&state, bad).await;
    assert_eq!(bad.status, JobStatus::Failed);
    match bad.result {
        Some(JobOutcome::Failed(reason)) => assert!(reason.starts_with("Pipeline task aborted")),
        other => panic!("expected failure, got {other:?}"),
    }

    let good = wait_for_job(&state, good).await;
    assert_eq!(good.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_callback_receives_terminal_payload_without_raw() {
    let (url, received) = spawn_callback_sink(StatusCode::OK).await;
    let state = default_state();
    let id = submission::submit(&state, input(None), Some(url)).unwrap();
    let _worker = worker::spawn(state.clone());

    wait_for_job(&state, id).await;
    let bodies = wait_for_callbacks(&received, 1).await;

    let body = &bodies[0];
    assert_eq!(body["job_id"], id.to_string());
    assert_eq!(body["status"], "completed");
    assert_eq!(body["receipt"]["store_name"], "Corner Market");
    assert!(body["receipt"]["shop_name"].is_null());
    assert!(body.get("raw").is_none());
    assert!(body.get("receipt_meta").is_none());
}

#[tokio::test]
async fn test_callback_includes_raw_when_enabled() {
    let (url, received) = spawn_callback_sink(StatusCode::OK).await;
    let config = AppConfig {
        include_raw: true,
        callback_url: Some(url),
        ..AppConfig::default()
    };
    let state = build_state(
        config,
        StubQa::ok(),
        StubDocs { fail: false },
        StubLlm::receipt(),
    );
    // No per-job URL: the global one applies
    let id = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    wait_for_job(&state, id).await;
    let bodies = wait_for_callbacks(&received, 1).await;
    let raw = &bodies[0]["raw"];
    assert_eq!(raw["extraction_a"].as_array().map(Vec::len), Some(9));
    assert!(raw["extraction_b"].is_object());
}

#[tokio::test]
async fn test_failed_callback_does_not_change_job_or_stop_worker() {
    let (url, received) = spawn_callback_sink(StatusCode::INTERNAL_SERVER_ERROR).await;
    let state = default_state();
    let first = submission::submit(&state, input(None), Some(url)).unwrap();
    let second = submission::submit(&state, input(None), Some("http://127.0.0.1:9/hook".into())).unwrap();
    let third = submission::submit(&state, input(None), None).unwrap();
    let _worker = worker::spawn(state.clone());

    for id in [first, second, third] {
        assert_eq!(wait_for_job(&state, id).await.status, JobStatus::Completed);
    }
    assert_eq!(wait_for_callbacks(&received, 1).await.len(), 1);
}

#[tokio::test]
async fn test_slow_callback_does_not_hold_the_queue() {
    let (url, received) = spawn_slow_callback_sink(StatusCode::OK, Duration::from_secs(2)).await;
    let state = default_state();
    let first = submission::submit(&state, input(None), Some(url)).unwrap();
    let second = submission::submit(&state, input(None), None).unwrap();

    let start = std::time::Instant::now();
    let _worker = worker::spawn(state.clone());

    assert_eq!(wait_for_job(&state, first).await.status, JobStatus::Completed);
    assert_eq!(wait_for_job(&state, second).await.status, JobStatus::Completed);
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "second job waited on the first job's callback: {:?}",
        start.elapsed()
    );

    // The slow delivery still happened
    assert_eq!(wait_for_callbacks(&received, 1).await[0]["job_id"], first.to_string());
}

#[tokio::test]
async fn test_sync_submission_never_calls_back() {
    let (url, received) = spawn_callback_sink(StatusCode::OK).await;
    let config = AppConfig {
        callback_url: Some(url),
        ..base_config()
    };
    let state = build_state(
        config,
        StubQa::ok(),
        StubDocs { fail: false },
        StubLlm::receipt(),
    );
    let _worker = worker::spawn(state.clone());

    let job = submission::submit_and_wait(&state, input(None)).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.callback_url.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_queue_drains_before_worker_stops() {
    let state = default_state();
    let ids: Vec<_> = (0..3)
        .map(|_| submission::submit(&state, input(None), None).unwrap())
        .collect();

    state.queue.close();
    assert!(submission::submit(&state, input(None), None).is_err());
    // The rejected job is not left behind in the store
    assert_eq!(state.store.len(), 3);

    tokio::time::timeout(Duration::from_secs(10), worker::run(state.clone()))
        .await
        .expect("worker did not stop after draining");

    for id in ids {
        assert_eq!(state.store.get(id).unwrap().status, JobStatus::Completed);
    }
    assert_eq!(state.queue.depth(), 0);
}

#[tokio::test]
async fn test_sync_wait_times_out_without_cancelling() {
    let tracker = Arc::new(Tracker::default());
    let config = AppConfig {
        pipeline_throttle_timeout: Some(1),
        ..AppConfig::default()
    };
    let state = build_state(
        config,
        StubQa::slow(Duration::from_millis(1500), tracker),
        StubDocs { fail: false },
        StubLlm::receipt(),
    );
    let _worker = worker::spawn(state.clone());

    let err = submission::submit_and_wait(&state, input(Some(vec!["slow".into()])))
        .await
        .unwrap_err();
    let submission::SubmitError::WaitTimeout { job_id, secs } = &err else {
        panic!("expected a wait timeout, got {err:?}");
    };
    assert_eq!(*secs, 1);

    let job = wait_for_job(&state, *job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
}
