//! Queue semantics under a live worker pool: priority dispatch, per-user
//! caps, cancellation, and timeouts.

use async_trait::async_trait;
use jobflow_core::error::{CoreError, Result};
use jobflow_core::queue::{CancelProbe, JobHandler, JobPriority, JobQueue, JobRequest, JobStatus, QueueConfig};
use jobflow_core::store::KvStore;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn test_queue(max_workers: usize) -> Arc<JobQueue> {
    let store = Arc::new(KvStore::open_temporary().unwrap());
    Arc::new(JobQueue::new(
        store,
        QueueConfig {
            max_workers,
            max_concurrent_per_user: 2,
            poll_interval: Duration::from_millis(20),
        },
    ))
}

/// Handler that appends a tag to a shared log, then sleeps briefly.
struct RecordingHandler {
    log: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn execute(&self, request: &JobRequest, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        let tag = request
            .payload
            .get("tag")
            .and_then(|t| t.as_str())
            .unwrap_or("?")
            .to_string();
        self.log.lock().unwrap().push(tag);
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "ok": true }))
    }
}

/// Handler that spins until cancelled.
struct SpinHandler;

#[async_trait]
impl JobHandler for SpinHandler {
    async fn execute(&self, _request: &JobRequest, cancel: &CancelProbe) -> Result<serde_json::Value> {
        for _ in 0..600 {
            cancel.check()?;
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        Ok(json!({ "ok": true }))
    }
}

async fn wait_for_status(queue: &JobQueue, job_id: Uuid, status: JobStatus, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if let Ok(Some(result)) = queue.get_job_status(job_id) {
            if result.status == status {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    false
}

#[tokio::test]
async fn higher_priority_job_dispatches_first() {
    let queue = test_queue(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler(
        "recording",
        Arc::new(RecordingHandler {
            log: Arc::clone(&log),
            delay: Duration::from_millis(30),
        }),
    );

    // Submitted in the same second, to an idle pool of capacity 1.
    let normal = queue
        .submit_job(Uuid::new_v4(), "recording", json!({"tag": "normal"}), JobPriority::Normal, None, 30)
        .unwrap();
    let critical = queue
        .submit_job(Uuid::new_v4(), "recording", json!({"tag": "critical"}), JobPriority::Critical, None, 30)
        .unwrap();

    queue.start_workers();
    assert!(wait_for_status(&queue, normal, JobStatus::Completed, Duration::from_secs(5)).await);
    assert!(wait_for_status(&queue, critical, JobStatus::Completed, Duration::from_secs(5)).await);

    assert_eq!(*log.lock().unwrap(), vec!["critical".to_string(), "normal".to_string()]);
    queue.stop_workers();
}

#[tokio::test]
async fn equal_priority_dispatch_is_fifo_by_submission_time() {
    let queue = test_queue(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler(
        "recording",
        Arc::new(RecordingHandler {
            log: Arc::clone(&log),
            delay: Duration::from_millis(10),
        }),
    );

    let first = queue
        .submit_job(Uuid::new_v4(), "recording", json!({"tag": "first"}), JobPriority::Normal, None, 30)
        .unwrap();
    // The FIFO component of the score has one-second resolution.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = queue
        .submit_job(Uuid::new_v4(), "recording", json!({"tag": "second"}), JobPriority::Normal, None, 30)
        .unwrap();

    queue.start_workers();
    assert!(wait_for_status(&queue, first, JobStatus::Completed, Duration::from_secs(5)).await);
    assert!(wait_for_status(&queue, second, JobStatus::Completed, Duration::from_secs(5)).await);
    assert_eq!(*log.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    queue.stop_workers();
}

#[tokio::test]
async fn third_submission_hits_the_user_cap_without_mutating_state() {
    let queue = test_queue(1);
    let user = Uuid::new_v4();

    queue
        .submit_job(user, "noop", json!({}), JobPriority::Normal, None, 30)
        .unwrap();
    queue
        .submit_job(user, "noop", json!({}), JobPriority::Normal, None, 30)
        .unwrap();

    let before = queue.get_queue_stats().unwrap();
    let err = queue
        .submit_job(user, "noop", json!({}), JobPriority::Normal, None, 30)
        .unwrap_err();
    assert!(matches!(err, CoreError::UserJobCap { max: 2, .. }));
    assert!(err.to_string().contains("maximum concurrent jobs limit (2)"));

    let after = queue.get_queue_stats().unwrap();
    assert_eq!(before.queue_size, after.queue_size);
    assert_eq!(queue.get_user_jobs(user).unwrap().len(), 2);

    // A different user is unaffected.
    assert!(queue
        .submit_job(Uuid::new_v4(), "noop", json!({}), JobPriority::Normal, None, 30)
        .is_ok());
}

#[tokio::test]
async fn cancel_mid_flight_frees_the_worker_slot() {
    let queue = test_queue(1);
    queue.register_handler("spin", Arc::new(SpinHandler));
    let user = Uuid::new_v4();

    let job = queue
        .submit_job(user, "spin", json!({}), JobPriority::Normal, None, 1800)
        .unwrap();
    queue.start_workers();
    assert!(wait_for_status(&queue, job, JobStatus::Running, Duration::from_secs(5)).await);

    assert!(queue.cancel_job(job, user).unwrap());
    assert!(wait_for_status(&queue, job, JobStatus::Cancelled, Duration::from_secs(5)).await);

    // Active-set entry is gone and a new job can run immediately.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = queue.get_queue_stats().unwrap();
        if stats.active_jobs == 0 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "active set never drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler(
        "recording",
        Arc::new(RecordingHandler {
            log: Arc::clone(&log),
            delay: Duration::from_millis(5),
        }),
    );
    let next = queue
        .submit_job(user, "recording", json!({"tag": "next"}), JobPriority::Normal, None, 30)
        .unwrap();
    assert!(wait_for_status(&queue, next, JobStatus::Completed, Duration::from_secs(5)).await);
    queue.stop_workers();
}

#[tokio::test]
async fn cancelling_anothers_job_is_refused() {
    let queue = test_queue(1);
    let owner = Uuid::new_v4();
    let job = queue
        .submit_job(owner, "noop", json!({}), JobPriority::Normal, None, 30)
        .unwrap();
    assert!(!queue.cancel_job(job, Uuid::new_v4()).unwrap());
    // Still queued.
    assert_eq!(queue.get_job_status(job).unwrap().unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn handler_overrun_becomes_a_timeout_result() {
    let queue = test_queue(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler(
        "slow",
        Arc::new(RecordingHandler {
            log,
            delay: Duration::from_secs(30),
        }),
    );
    let job = queue
        .submit_job(Uuid::new_v4(), "slow", json!({"tag": "slow"}), JobPriority::Normal, None, 1)
        .unwrap();
    queue.start_workers();
    assert!(wait_for_status(&queue, job, JobStatus::Timeout, Duration::from_secs(10)).await);
    let result = queue.get_job_status(job).unwrap().unwrap();
    assert!(result.error.unwrap().contains("timed out"));
    queue.stop_workers();
}

#[tokio::test]
async fn unregistered_job_type_fails() {
    let queue = test_queue(1);
    let job = queue
        .submit_job(Uuid::new_v4(), "mystery", json!({}), JobPriority::Normal, None, 30)
        .unwrap();
    queue.start_workers();
    assert!(wait_for_status(&queue, job, JobStatus::Failed, Duration::from_secs(5)).await);
    let result = queue.get_job_status(job).unwrap().unwrap();
    assert!(result.error.unwrap().contains("no handler registered"));
    queue.stop_workers();
}

#[tokio::test]
async fn scheduled_jobs_wait_until_due() {
    let queue = test_queue(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler(
        "recording",
        Arc::new(RecordingHandler {
            log: Arc::clone(&log),
            delay: Duration::from_millis(5),
        }),
    );

    let job = queue
        .submit_job(
            Uuid::new_v4(),
            "recording",
            json!({"tag": "later"}),
            JobPriority::Normal,
            Some(chrono::Utc::now() + chrono::Duration::milliseconds(700)),
            30,
        )
        .unwrap();
    queue.start_workers();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.get_job_status(job).unwrap().unwrap().status, JobStatus::Queued);

    assert!(wait_for_status(&queue, job, JobStatus::Completed, Duration::from_secs(5)).await);
    queue.stop_workers();
}

#[tokio::test]
async fn user_job_listing_is_newest_first() {
    let queue = test_queue(1);
    let user = Uuid::new_v4();
    let a = queue
        .submit_job(user, "noop", json!({}), JobPriority::Normal, None, 30)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let b = queue
        .submit_job(user, "noop", json!({}), JobPriority::Low, None, 30)
        .unwrap();

    let jobs = queue.get_user_jobs(user).unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].job_id, b);
    assert_eq!(jobs[1].job_id, a);
    assert_eq!(jobs[0].priority, 4);

    let stats = queue.get_queue_stats().unwrap();
    assert_eq!(stats.queue_size, 2);
    assert_eq!(stats.priority_breakdown["NORMAL"], 1);
    assert_eq!(stats.priority_breakdown["LOW"], 1);
}
