//! Queue API integration tests: enqueue, listings, status, settings.

mod common;

use std::time::Duration;

use common::test_queue;
use jobctl_core::{EnqueueRequest, JobState, QueueError, StateListing};

fn request(command: &str) -> EnqueueRequest {
    EnqueueRequest {
        command: Some(command.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn enqueue_applies_defaults_and_generates_id() {
    let harness = test_queue().await;

    let id = harness.queue.enqueue(request("echo hi")).await.unwrap();
    assert!(id.starts_with("job_"));
    assert_eq!(id.len(), "job_".len() + 8);

    let job = harness.job(&id).await;
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.priority, 0);
    assert_eq!(job.run_at, None);
    assert_eq!(job.locked_by, None);
    assert_eq!(job.created_at, job.updated_at);
}

#[tokio::test]
async fn enqueue_requires_a_command() {
    let harness = test_queue().await;

    let missing = harness.queue.enqueue(EnqueueRequest::default()).await;
    assert!(matches!(missing, Err(QueueError::EmptyCommand)));

    let blank = harness.queue.enqueue(request("   ")).await;
    assert!(matches!(blank, Err(QueueError::EmptyCommand)));
}

#[tokio::test]
async fn enqueue_reports_duplicate_ids() {
    let harness = test_queue().await;

    let mut req = request("echo hi");
    req.id = Some("t1".to_string());
    harness.queue.enqueue(req.clone()).await.unwrap();

    let collision = harness.queue.enqueue(req).await;
    match collision {
        Err(QueueError::DuplicateJob(id)) => assert_eq!(id, "t1"),
        other => panic!("expected duplicate error, got {other:?}"),
    }
}

#[tokio::test]
async fn enqueue_rejects_malformed_run_at() {
    let harness = test_queue().await;

    let mut req = request("echo hi");
    req.run_at = Some("next tuesday".to_string());
    assert!(matches!(
        harness.queue.enqueue(req).await,
        Err(QueueError::InvalidRunAt(_))
    ));
}

#[tokio::test]
async fn list_by_state_orders_by_creation_time() {
    let harness = test_queue().await;

    for id in ["a", "b", "c"] {
        let mut req = request("echo hi");
        req.id = Some(id.to_string());
        harness.queue.enqueue(req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    match harness.queue.list_by_state("pending").await.unwrap() {
        StateListing::Jobs(jobs) => {
            let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
            assert_eq!(ids, ["a", "b", "c"]);
        }
        other => panic!("expected job listing, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_state_lists_nothing() {
    let harness = test_queue().await;
    harness.queue.enqueue(request("echo hi")).await.unwrap();

    match harness.queue.list_by_state("sleeping").await.unwrap() {
        StateListing::Jobs(jobs) => assert!(jobs.is_empty()),
        other => panic!("expected empty job listing, got {other:?}"),
    }
}

#[tokio::test]
async fn status_reports_counts_and_oldest_pending() {
    let harness = test_queue().await;

    let first = harness.queue.enqueue(request("echo hi")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.queue.enqueue(request("echo hi")).await.unwrap();

    let status = harness.queue.status().await.unwrap();
    assert_eq!(status.pending, 2);
    assert_eq!(status.processing, 0);
    assert_eq!(status.completed, 0);
    assert_eq!(status.failed, 0);
    assert_eq!(status.dead, 0);
    assert_eq!(
        status.oldest_pending,
        Some(harness.job(&first).await.created_at)
    );

    // No mutations in between: successive reads are identical.
    assert_eq!(status, harness.queue.status().await.unwrap());
}

#[tokio::test]
async fn status_on_empty_queue() {
    let harness = test_queue().await;

    let status = harness.queue.status().await.unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(status.active_workers, 0);
    assert_eq!(status.oldest_pending, None);
}

#[tokio::test]
async fn config_defaults_and_overrides() {
    let harness = test_queue().await;
    let config = harness.queue.config();

    // Built-in defaults apply until a value is stored.
    assert_eq!(config.get("max_retries").await.unwrap().as_deref(), Some("3"));
    assert_eq!(config.get_int("backoff_base").await.unwrap(), 2);
    assert_eq!(config.get("no_such_key").await.unwrap(), None);
    assert_eq!(config.get_int("no_such_key").await.unwrap(), 0);

    config.set("backoff_base", "5").await.unwrap();
    assert_eq!(config.get_int("backoff_base").await.unwrap(), 5);

    // Unparsable values read as 0, not as an error.
    config.set("backoff_base", "fast").await.unwrap();
    assert_eq!(config.get_int("backoff_base").await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_default_retry_budget_follows_settings() {
    let harness = test_queue().await;
    harness.queue.config().set("max_retries", "5").await.unwrap();

    let id = harness.queue.enqueue(request("echo hi")).await.unwrap();
    assert_eq!(harness.job(&id).await.max_retries, 5);

    // An explicit budget still wins over the setting.
    let mut req = request("echo hi");
    req.max_retries = Some(1);
    let id = harness.queue.enqueue(req).await.unwrap();
    assert_eq!(harness.job(&id).await.max_retries, 1);
}

#[tokio::test]
async fn dlq_retry_unknown_entry_is_an_error() {
    let harness = test_queue().await;

    match harness.queue.dlq_retry("dlq_missing").await {
        Err(QueueError::DlqEntryNotFound(id)) => assert_eq!(id, "dlq_missing"),
        other => panic!("expected not-found error, got {other:?}"),
    }
}
