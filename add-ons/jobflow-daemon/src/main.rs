//! jobflow worker daemon.
//!
//! A long-running process that owns the queue workers and the backup
//! scheduler. The HTTP layer (wherever it runs) only submits jobs and reads
//! statuses through the shared store; everything that executes lives here.
//!
//! External subsystems (resume tailoring, job discovery, the project
//! database, the Q&A service) plug in through the collaborator traits; a
//! deployment wires real adapters where this binary registers
//! `Unconfigured` placeholders. The browser-driven application runner is
//! compiled in with `--features browser`.

mod runner;

use jobflow_core::audit::AuditLog;
use jobflow_core::backup::{run_backup_scheduler, BackupManager};
use jobflow_core::error::{CoreError, Result};
use jobflow_core::handlers::{self, Collaborators, DiscoveryReport, HandlerDeps, QaService, TailorRequest};
use jobflow_core::quota::{GeminiQuotaManager, QuotaConfig};
use jobflow_core::ratelimit::RateLimiter;
use jobflow_core::relevance::ProjectRecord;
use jobflow_core::vault::{CredentialVault, ServiceLogin};
use jobflow_core::{CoreConfig, JobQueue, KvStore, QueueConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Placeholder for collaborator subsystems not wired into this deployment.
struct Unconfigured(&'static str);

#[async_trait::async_trait]
impl handlers::ResumeTailor for Unconfigured {
    async fn tailor(&self, _request: TailorRequest) -> Result<String> {
        Err(CoreError::Config(format!("{} is not configured", self.0)))
    }
}

#[async_trait::async_trait]
impl handlers::JobDiscovery for Unconfigured {
    async fn search_and_save(&self, _user_id: uuid::Uuid, _min_relevance_score: i64) -> Result<DiscoveryReport> {
        Err(CoreError::Config(format!("{} is not configured", self.0)))
    }
}

#[async_trait::async_trait]
impl handlers::ProjectSource for Unconfigured {
    async fn projects_for_user(&self, _user_id: uuid::Uuid) -> Result<Vec<ProjectRecord>> {
        Err(CoreError::Config(format!("{} is not configured", self.0)))
    }
}

#[async_trait::async_trait]
impl QaService for Unconfigured {
    async fn authenticate(&self, _login: &ServiceLogin) -> Result<()> {
        Err(CoreError::Config(format!("{} is not configured", self.0)))
    }

    async fn ask_batch(&self, _questions: &[String]) -> Result<Vec<String>> {
        Err(CoreError::Config(format!("{} is not configured", self.0)))
    }
}

#[tokio::main]
async fn main() {
    // Load .env before any env::var reads.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[jobflow-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::load().expect("load CoreConfig");
    let store = Arc::new(KvStore::open_path(&config.data_path).expect("open jobflow store"));

    let limiter = Arc::new(RateLimiter::new(Arc::clone(&store), &config));
    let quota = Arc::new(GeminiQuotaManager::new(Arc::clone(&store), QuotaConfig::from_core(&config)));
    let vault = Arc::new(CredentialVault::from_env(Arc::clone(&store)));
    if !vault.is_unlocked() {
        tracing::warn!("JOBFLOW_VAULT_KEY not set; per-user credentials are unavailable");
    }
    let deps = Arc::new(HandlerDeps {
        limiter,
        quota,
        audit: AuditLog::new(Arc::clone(&store)),
        vault,
    });

    let queue = Arc::new(JobQueue::new(Arc::clone(&store), QueueConfig::from_core(&config)));
    handlers::register_all(
        &queue,
        Arc::clone(&deps),
        Collaborators {
            tailor: Arc::new(Unconfigured("resume tailoring pipeline")),
            runner: runner::application_runner(&config),
            discovery: Arc::new(Unconfigured("job discovery aggregator")),
            projects: Arc::new(Unconfigured("project database")),
            qa: Arc::new(Unconfigured("Q&A service")),
        },
    );
    queue.start_workers();

    let backups = Arc::new(
        BackupManager::new(Arc::clone(&store), config.backup.clone()).expect("initialize backup manager"),
    );
    let backup_task = tokio::spawn(run_backup_scheduler(Arc::clone(&backups)));

    tracing::info!(
        workers = config.max_workers,
        data_path = %config.data_path.display(),
        "jobflow daemon started"
    );

    tokio::signal::ctrl_c().await.expect("install ctrl-c handler");
    tracing::info!("CTRL-C received; shutting down");
    queue.stop_workers();
    backup_task.abort();
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "store flush failed during shutdown");
    }
}
