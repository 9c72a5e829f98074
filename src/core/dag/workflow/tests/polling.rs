use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::core::client::TransportError;
use crate::core::progress::RecordingProgress;

#[tokio::test(start_paused = true)]
async fn running_then_missing_catalog_row_fails_after_one_interval() {
    let transport = accepting_backend();
    transport.once(STATE, 200, "running");
    transport.always(STATE, 200, "finished");
    transport.always_json(CATALOG, json!({ "data": [] }));

    let started = Instant::now();
    let report = orchestrator(transport.clone(), Duration::from_secs(10))
        .run(&request(), &RecordingProgress::default(), &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.final_status, WorkflowStatus::Failed);
    assert_eq!(transport.count(STATE), 2);
    assert_eq!(transport.count(CATALOG), 1);
    assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21), "{:?}", elapsed);
    let last = report.final_task_status.unwrap();
    assert!(last.is_failed);
    assert_eq!(last.final_state.as_deref(), Some("unknown"));
}

#[tokio::test(start_paused = true)]
async fn never_finishing_job_times_out_at_max_wait() {
    let transport = accepting_backend();
    transport.always(STATE, 200, "running");
    let mut req = request();
    req.max_wait = Duration::from_secs(30);

    let started = Instant::now();
    let report = orchestrator(transport.clone(), Duration::ZERO)
        .run(&req, &RecordingProgress::default(), &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.final_status, WorkflowStatus::Timeout);
    assert_eq!(transport.count(STATE), 3);
    assert_eq!(transport.count(CATALOG), 0);
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31), "{:?}", elapsed);
    assert_eq!(report.steps[2].result["reason"], "max wait exceeded");
}

#[tokio::test(start_paused = true)]
async fn catalog_success_completes() {
    let transport = accepting_backend();
    transport.always(STATE, 200, "success");
    transport.always_json(CATALOG, json!({ "data": [{ "dagId": "dag-1", "state": "success" }] }));

    let report = orchestrator(transport, Duration::from_secs(10))
        .run(&request(), &RecordingProgress::default(), &CancellationToken::new())
        .await;

    assert_eq!(report.final_status, WorkflowStatus::Completed);
    assert!(report.succeeded());
    assert!(report.steps[2].success);
    assert_eq!(report.steps[2].name, "wait_for_completion");
}

#[tokio::test(start_paused = true)]
async fn poll_errors_keep_polling() {
    let transport = accepting_backend();
    transport.fail_once(STATE, TransportError::Timeout(Duration::from_secs(30)));
    transport.always(STATE, 200, "success");
    transport.always_json(CATALOG, json!({ "data": [{ "dagId": "dag-1", "state": "failed" }] }));
    let progress = RecordingProgress::default();

    let report = orchestrator(transport.clone(), Duration::ZERO)
        .run(&request(), &progress, &CancellationToken::new())
        .await;

    assert_eq!(report.final_status, WorkflowStatus::Failed);
    assert_eq!(transport.count(STATE), 2);
    assert!(progress.messages().iter().any(|m| m.contains("Poll 1 failed")));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_polling_as_timeout() {
    let transport = accepting_backend();
    transport.always(STATE, 200, "running");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = orchestrator(transport.clone(), Duration::ZERO)
        .run(&request(), &RecordingProgress::default(), &cancel)
        .await;

    assert_eq!(report.final_status, WorkflowStatus::Timeout);
    assert_eq!(report.steps[2].result["reason"], "cancelled");
    assert_eq!(transport.count(STATE), 3);
    assert!(started.elapsed() < Duration::from_secs(26));
}

#[tokio::test(start_paused = true)]
async fn huge_max_wait_is_bounded_by_cancellation() {
    let transport = accepting_backend();
    transport.always(STATE, 200, "running");
    let mut req = request();
    req.max_wait = Duration::from_secs(u64::MAX);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.cancel();
    });

    let report = orchestrator(transport.clone(), Duration::ZERO)
        .run(&req, &RecordingProgress::default(), &cancel)
        .await;

    assert_eq!(report.final_status, WorkflowStatus::Timeout);
    assert_eq!(report.steps[2].result["reason"], "cancelled");
    assert_eq!(transport.count(STATE), 3);
}
