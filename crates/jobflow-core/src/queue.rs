//! Priority job queue with a bounded worker pool.
//!
//! State lives in the shared store so submission (API side) and execution
//! (daemon side) agree: a score-ordered pending queue, an active set, job
//! data, a per-user index, and results — everything job-scoped carries a
//! 24-hour TTL. Scores are `priority * 10^6 + created_at_epoch`, lower
//! dispatches first, so equal-priority jobs run FIFO.
//!
//! Cancellation is cooperative: `cancel_job` removes a queued job outright
//! and flags a running one through a `cancel_signal` record its worker (and
//! handler, between suspension points) polls.

use crate::error::{CoreError, Result};
use crate::store::KvStore;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const QUEUE_TREE: &str = "job_queue";
const DATA_TREE: &str = "job_data";
const INDEX_TREE: &str = "queued_index";
const ACTIVE_TREE: &str = "active_jobs";
const USER_TREE: &str = "user_jobs";
const RESULT_TREE: &str = "job_results";
const CANCEL_TREE: &str = "cancel_signals";

/// TTL for job data, user index entries, and results.
pub const JOB_TTL: Duration = Duration::from_secs(86_400);
/// TTL for the cancellation flag a running job's worker polls.
pub const CANCEL_SIGNAL_TTL: Duration = Duration::from_secs(300);

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Dispatch priority; lower value dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    /// System maintenance, critical fixes
    Critical,
    /// Premium users, urgent requests
    High,
    /// Regular users, standard requests
    Normal,
    /// Batch jobs, background tasks
    Low,
    /// Mass operations
    Bulk,
}

impl JobPriority {
    pub fn value(self) -> u8 {
        match self {
            JobPriority::Critical => 1,
            JobPriority::High => 2,
            JobPriority::Normal => 3,
            JobPriority::Low => 4,
            JobPriority::Bulk => 5,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(JobPriority::Critical),
            2 => Some(JobPriority::High),
            3 => Some(JobPriority::Normal),
            4 => Some(JobPriority::Low),
            5 => Some(JobPriority::Bulk),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            JobPriority::Critical => "CRITICAL",
            JobPriority::High => "HIGH",
            JobPriority::Normal => "NORMAL",
            JobPriority::Low => "LOW",
            JobPriority::Bulk => "BULK",
        }
    }
}

impl Serialize for JobPriority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

impl<'de> Deserialize<'de> for JobPriority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        JobPriority::from_value(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid priority: {}", value)))
    }
}

/// A submitted job. Exclusively owned by the queue until a worker claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub job_type: String,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
}

/// Execution outcome, persisted for 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

impl JobResult {
    fn bare(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            execution_time: None,
        }
    }
}

/// Entry in the queued index; lets membership checks and removals avoid
/// scanning the score-ordered tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct QueuedMeta {
    score: u64,
    priority: u8,
}

/// Summary row for `get_user_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJobSummary {
    pub job_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub priority: u8,
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub active_jobs: usize,
    pub max_workers: usize,
    pub priority_breakdown: BTreeMap<String, usize>,
    pub worker_running: bool,
}

/// Cooperative cancellation probe handed to handlers. Check it at
/// suspension points (page iterations, before expensive calls).
#[derive(Clone)]
pub struct CancelProbe {
    store: Arc<KvStore>,
    job_id: Uuid,
}

impl CancelProbe {
    pub fn is_cancelled(&self) -> bool {
        self.store
            .contains(CANCEL_TREE, &self.job_id.to_string())
            .unwrap_or(false)
    }

    /// Errors with `CoreError::Cancelled` when the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Probe that never fires. For collaborators invoked outside a job.
    pub fn noop(store: Arc<KvStore>) -> Self {
        Self {
            store,
            job_id: Uuid::nil(),
        }
    }
}

/// A registered job executor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, request: &JobRequest, cancel: &CancelProbe) -> Result<serde_json::Value>;
}

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_workers: usize,
    pub max_concurrent_per_user: usize,
    /// Idle/backoff sleep in the worker loop. Shortened in tests.
    pub poll_interval: Duration,
}

impl QueueConfig {
    pub fn from_core(config: &crate::config::CoreConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            max_concurrent_per_user: config.max_concurrent_per_user,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// The queue itself. Cheap to clone behind an `Arc`.
pub struct JobQueue {
    store: Arc<KvStore>,
    config: QueueConfig,
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    running: AtomicBool,
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl JobQueue {
    pub fn new(store: Arc<KvStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            handlers: DashMap::new(),
            running: AtomicBool::new(false),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    pub fn register_handler(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        info!(target: "jobflow::queue", job_type, "registered handler");
        self.handlers.insert(job_type.to_string(), handler);
    }

    fn score(priority: JobPriority, created_at: chrono::DateTime<chrono::Utc>) -> u64 {
        priority.value() as u64 * 1_000_000 + created_at.timestamp().max(0) as u64
    }

    /// Jobs of this user currently queued or running.
    fn user_active_jobs(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let prefix = format!("{}\u{0}", user_id);
        let mut active = Vec::new();
        for (_, job_id) in self.store.scan_json::<Uuid>(USER_TREE, &prefix)? {
            let id = job_id.to_string();
            if self.store.contains(ACTIVE_TREE, &id)? || self.store.contains(INDEX_TREE, &id)? {
                active.push(job_id);
            }
        }
        Ok(active)
    }

    /// Submits a job. Fails without mutating any state when the user already
    /// holds `max_concurrent_per_user` queued + running jobs.
    pub fn submit_job(
        &self,
        user_id: Uuid,
        job_type: &str,
        payload: serde_json::Value,
        priority: JobPriority,
        scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
        timeout_seconds: u64,
    ) -> Result<Uuid> {
        if self.user_active_jobs(user_id)?.len() >= self.config.max_concurrent_per_user {
            return Err(CoreError::UserJobCap {
                user_id,
                max: self.config.max_concurrent_per_user,
            });
        }

        let request = JobRequest {
            job_id: Uuid::new_v4(),
            user_id,
            job_type: job_type.to_string(),
            priority,
            payload,
            created_at: chrono::Utc::now(),
            scheduled_at,
            timeout_seconds,
            retry_count: 0,
            max_retries: 3,
        };
        let score = Self::score(priority, request.created_at);
        let id = request.job_id.to_string();

        self.store.put_json(DATA_TREE, &id, &request, Some(JOB_TTL))?;
        self.store.queue_push(QUEUE_TREE, score, &id)?;
        self.store.put_json(
            INDEX_TREE,
            &id,
            &QueuedMeta {
                score,
                priority: priority.value(),
            },
            Some(JOB_TTL),
        )?;
        self.store.put_json(
            USER_TREE,
            &format!("{}\u{0}{}", user_id, id),
            &request.job_id,
            Some(JOB_TTL),
        )?;

        info!(
            target: "jobflow::queue",
            job_id = %request.job_id,
            user_id = %user_id,
            job_type,
            priority = priority.name(),
            "job submitted"
        );
        Ok(request.job_id)
    }

    /// Status precedence: RUNNING (active set) > QUEUED (pending index) >
    /// terminal result > unknown.
    pub fn get_job_status(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        let id = job_id.to_string();
        if self.store.contains(ACTIVE_TREE, &id)? {
            return Ok(Some(JobResult::bare(job_id, JobStatus::Running)));
        }
        if self.store.contains(INDEX_TREE, &id)? {
            return Ok(Some(JobResult::bare(job_id, JobStatus::Queued)));
        }
        self.store.get_json::<JobResult>(RESULT_TREE, &id)
    }

    /// Cancels a job owned by `user_id`. Queued jobs are removed outright;
    /// running jobs get a cancellation flag their worker polls. Returns
    /// whether the job existed and belonged to the user.
    pub fn cancel_job(&self, job_id: Uuid, user_id: Uuid) -> Result<bool> {
        let id = job_id.to_string();
        let Some(request) = self.store.get_json::<JobRequest>(DATA_TREE, &id)? else {
            return Ok(false);
        };
        if request.user_id != user_id {
            return Ok(false);
        }

        if let Some(meta) = self.store.get_json::<QueuedMeta>(INDEX_TREE, &id)? {
            self.store.queue_remove(QUEUE_TREE, meta.score, &id)?;
            self.store.remove(INDEX_TREE, &id)?;
        }
        if self.store.contains(ACTIVE_TREE, &id)? {
            self.store.put_json(CANCEL_TREE, &id, &true, Some(CANCEL_SIGNAL_TTL))?;
        }

        let result = JobResult {
            completed_at: Some(chrono::Utc::now()),
            ..JobResult::bare(job_id, JobStatus::Cancelled)
        };
        self.store.put_json(RESULT_TREE, &id, &result, Some(JOB_TTL))?;
        info!(target: "jobflow::queue", job_id = %job_id, user_id = %user_id, "job cancelled");
        Ok(true)
    }

    pub fn get_queue_stats(&self) -> Result<QueueStats> {
        let queued = self.store.scan_json::<QueuedMeta>(INDEX_TREE, "")?;
        let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();
        for p in [
            JobPriority::Critical,
            JobPriority::High,
            JobPriority::Normal,
            JobPriority::Low,
            JobPriority::Bulk,
        ] {
            breakdown.insert(p.name().to_string(), 0);
        }
        for (_, meta) in &queued {
            if let Some(p) = JobPriority::from_value(meta.priority) {
                *breakdown.entry(p.name().to_string()).or_insert(0) += 1;
            }
        }
        Ok(QueueStats {
            queue_size: queued.len(),
            active_jobs: self.store.count_prefix(ACTIVE_TREE, "")?,
            max_workers: self.config.max_workers,
            priority_breakdown: breakdown,
            worker_running: self.running.load(Ordering::Relaxed),
        })
    }

    /// All known jobs for a user, newest first.
    pub fn get_user_jobs(&self, user_id: Uuid) -> Result<Vec<UserJobSummary>> {
        let prefix = format!("{}\u{0}", user_id);
        let mut jobs = Vec::new();
        for (_, job_id) in self.store.scan_json::<Uuid>(USER_TREE, &prefix)? {
            let Some(status) = self.get_job_status(job_id)? else {
                continue;
            };
            let Some(request) = self.store.get_json::<JobRequest>(DATA_TREE, &job_id.to_string())? else {
                continue;
            };
            jobs.push(UserJobSummary {
                job_id,
                job_type: request.job_type,
                status: status.status,
                created_at: request.created_at,
                priority: request.priority.value(),
            });
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Starts `max_workers` worker loops. Idempotent.
    pub fn start_workers(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in 0..self.config.max_workers {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.worker_loop(slot).await;
            });
        }
        info!(target: "jobflow::queue", workers = self.config.max_workers, "queue workers started");
    }

    /// Signals workers to stop after their current job.
    pub fn stop_workers(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn worker_loop(self: Arc<Self>, slot: usize) {
        while self.running.load(Ordering::Relaxed) {
            match self.dispatch_one().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    error!(target: "jobflow::queue", slot, error = %e, "worker loop error");
                    tokio::time::sleep(self.config.poll_interval.saturating_mul(5)).await;
                }
            }
        }
    }

    /// Claims and runs at most one job. Returns whether a job was executed.
    async fn dispatch_one(self: &Arc<Self>) -> Result<bool> {
        let claimed = {
            let _guard = self.dispatch_lock.lock().await;

            if self.store.count_prefix(ACTIVE_TREE, "")? >= self.config.max_workers {
                return Ok(false);
            }
            let Some((score, id)) = self.store.queue_pop_min(QUEUE_TREE)? else {
                return Ok(false);
            };
            let Some(request) = self.store.get_json::<JobRequest>(DATA_TREE, &id)? else {
                // Data expired while queued; drop the orphan.
                self.store.remove(INDEX_TREE, &id)?;
                return Ok(false);
            };
            if matches!(request.scheduled_at, Some(at) if at > chrono::Utc::now()) {
                // Not due yet: push back with the original score so the job
                // keeps its queue position.
                self.store.queue_push(QUEUE_TREE, score, &id)?;
                return Ok(false);
            }
            self.store.remove(INDEX_TREE, &id)?;
            self.store
                .put_json(ACTIVE_TREE, &id, &chrono::Utc::now(), Some(JOB_TTL))?;
            request
        };

        self.execute_job(claimed).await;
        Ok(true)
    }

    async fn execute_job(self: &Arc<Self>, request: JobRequest) {
        let id = request.job_id.to_string();
        let started_at = chrono::Utc::now();
        let start = std::time::Instant::now();
        info!(target: "jobflow::queue", job_id = %request.job_id, job_type = %request.job_type, "starting job");

        let cancel = CancelProbe {
            store: Arc::clone(&self.store),
            job_id: request.job_id,
        };

        let outcome: Result<serde_json::Value> = async {
            let handler = self
                .handlers
                .get(&request.job_type)
                .map(|h| Arc::clone(h.value()))
                .ok_or_else(|| CoreError::UnknownJobType(request.job_type.clone()))?;
            cancel.check()?;
            match tokio::time::timeout(
                Duration::from_secs(request.timeout_seconds.max(1)),
                handler.execute(&request, &cancel),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CoreError::JobTimeout {
                    seconds: request.timeout_seconds,
                }),
            }
        }
        .await;

        let mut result = JobResult {
            started_at: Some(started_at),
            completed_at: Some(chrono::Utc::now()),
            execution_time: Some(start.elapsed().as_secs_f64()),
            ..JobResult::bare(request.job_id, JobStatus::Completed)
        };
        match outcome {
            Ok(value) => {
                result.result = Some(value);
            }
            Err(CoreError::Cancelled) => {
                result.status = JobStatus::Cancelled;
                result.error = Some("job was cancelled".into());
            }
            Err(CoreError::JobTimeout { seconds }) => {
                result.status = JobStatus::Timeout;
                result.error = Some(format!("job timed out after {} seconds", seconds));
            }
            Err(e) => {
                result.status = JobStatus::Failed;
                result.error = Some(e.to_string());
            }
        }

        if let Err(e) = self.store.put_json(RESULT_TREE, &id, &result, Some(JOB_TTL)) {
            error!(target: "jobflow::queue", job_id = %request.job_id, error = %e, "failed to store result");
        }
        info!(
            target: "jobflow::queue",
            job_id = %request.job_id,
            status = ?result.status,
            execution_time = result.execution_time,
            "job finished"
        );

        // Guaranteed cleanup: active-set entry and cancellation flag.
        if let Err(e) = self.store.remove(ACTIVE_TREE, &id) {
            warn!(target: "jobflow::queue", job_id = %request.job_id, error = %e, "active-set cleanup failed");
        }
        let _ = self.store.remove(CANCEL_TREE, &id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_orders_priority_then_fifo() {
        let now = chrono::Utc::now();
        let later = now + chrono::Duration::seconds(1);
        assert!(JobQueue::score(JobPriority::Critical, now) < JobQueue::score(JobPriority::Normal, now));
        assert!(JobQueue::score(JobPriority::Normal, now) < JobQueue::score(JobPriority::Normal, later));
    }

    #[test]
    fn priority_round_trips_as_number() {
        let json = serde_json::to_string(&JobPriority::High).unwrap();
        assert_eq!(json, "2");
        let back: JobPriority = serde_json::from_str("2").unwrap();
        assert_eq!(back, JobPriority::High);
        assert!(serde_json::from_str::<JobPriority>("9").is_err());
    }
}
