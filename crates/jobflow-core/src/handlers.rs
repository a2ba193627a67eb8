//! Concrete job handlers: resume tailoring, job application, job search, and
//! project analysis.
//!
//! Every handler follows the same skeleton: validate the payload, acquire
//! rate limits (and a Gemini reservation for LLM-heavy work), execute the
//! underlying subsystem, record the audit event, and release reservations on
//! every exit path. The heavy subsystems themselves (tailoring pipeline,
//! browser runner, discovery aggregator, Q&A service) sit behind traits so
//! handlers stay testable without the outside world.

use crate::audit::{event_type, AuditLog};
use crate::error::{CoreError, Result};
use crate::queue::{CancelProbe, JobHandler, JobPriority, JobQueue, JobRequest};
use crate::quota::GeminiQuotaManager;
use crate::ratelimit::RateLimiter;
use crate::relevance::{self, ProjectRecord};
use crate::vault::{CredentialVault, OauthCredentials, ServiceLogin};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Registered job-type names.
pub mod job_type {
    pub const RESUME_TAILORING: &str = "resume_tailoring";
    pub const JOB_APPLICATION: &str = "job_application";
    pub const JOB_SEARCH: &str = "job_search";
    pub const PROJECT_ANALYSIS: &str = "project_analysis";
}

/// Per-type execution deadlines.
pub mod timeouts {
    pub const RESUME_TAILORING_SECS: u64 = 600;
    pub const JOB_APPLICATION_SECS: u64 = 1800;
    pub const JOB_SEARCH_SECS: u64 = 300;
    pub const PROJECT_ANALYSIS_SECS: u64 = 300;
}

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Input to the external resume-tailoring pipeline.
#[derive(Debug, Clone)]
pub struct TailorRequest {
    pub original_resume_url: String,
    pub job_description: String,
    pub job_title: String,
    pub company: String,
    pub credentials: Option<OauthCredentials>,
    pub service_login: Option<ServiceLogin>,
    pub user_full_name: String,
}

/// External resume-tailoring pipeline. Returns the tailored resume URL.
#[async_trait]
pub trait ResumeTailor: Send + Sync {
    async fn tailor(&self, request: TailorRequest) -> Result<String>;
}

/// Normalized outcome of the multi-source discovery aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub jobs: Vec<serde_json::Value>,
    pub count: usize,
    #[serde(default)]
    pub sources: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub average_score: f64,
    #[serde(default)]
    pub saved_count: usize,
    #[serde(default)]
    pub updated_count: usize,
}

/// External job discovery aggregator (contract: return normalized records).
#[async_trait]
pub trait JobDiscovery: Send + Sync {
    async fn search_and_save(&self, user_id: Uuid, min_relevance_score: i64) -> Result<DiscoveryReport>;
}

/// One browser-driven application run.
#[derive(Debug, Clone)]
pub struct ApplicationRun {
    pub user_id: Uuid,
    pub job_url: String,
    pub resume_url: String,
}

/// Drives a browser session through the form-fill loop for one posting.
/// Sessions are exclusive to the job and namespaced by user id.
#[async_trait]
pub trait ApplicationRunner: Send + Sync {
    async fn run(&self, request: ApplicationRun, cancel: &CancelProbe) -> Result<serde_json::Value>;
}

/// Per-user project database access.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn projects_for_user(&self, user_id: Uuid) -> Result<Vec<ProjectRecord>>;
}

/// External Q&A service: authenticate once, then answer text questions in a
/// batch.
#[async_trait]
pub trait QaService: Send + Sync {
    async fn authenticate(&self, login: &ServiceLogin) -> Result<()>;
    async fn ask_batch(&self, questions: &[String]) -> Result<Vec<String>>;
}

/// Shared plumbing every handler needs.
pub struct HandlerDeps {
    pub limiter: Arc<RateLimiter>,
    pub quota: Arc<GeminiQuotaManager>,
    pub audit: AuditLog,
    pub vault: Arc<CredentialVault>,
}

impl HandlerDeps {
    fn audit_success(&self, user_id: Uuid, action: &str, started: std::time::Instant, detail: serde_json::Value) {
        let _ = self
            .audit
            .record(event_type::DATA_ACCESS, Some(user_id), action, started.elapsed().as_secs_f64(), detail);
    }

    fn audit_failure(&self, user_id: Uuid, action: &str, started: std::time::Instant, error: &CoreError) {
        let _ = self.audit.record(
            event_type::API_ABUSE,
            Some(user_id),
            action,
            started.elapsed().as_secs_f64(),
            json!({ "error": error.to_string() }),
        );
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn default_job_title() -> String {
    "Unknown Position".into()
}

fn default_company() -> String {
    "Unknown Company".into()
}

fn default_user_name() -> String {
    "User".into()
}

fn default_min_relevance() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct ResumeTailoringPayload {
    pub original_resume_url: String,
    pub job_description: String,
    #[serde(default = "default_job_title")]
    pub job_title: String,
    #[serde(default = "default_company")]
    pub company: String,
    #[serde(default)]
    pub credentials: Option<OauthCredentials>,
    #[serde(default = "default_user_name")]
    pub user_full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct JobApplicationPayload {
    pub job_url: String,
    pub resume_url: String,
    #[serde(default)]
    pub use_tailored: bool,
    #[serde(default)]
    pub tailored_resume_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobSearchPayload {
    #[serde(default = "default_min_relevance")]
    pub min_relevance_score: i64,
}

#[derive(Debug, Deserialize)]
pub struct ProjectAnalysisPayload {
    pub job_description: String,
    #[serde(default)]
    pub job_keywords: Vec<String>,
    #[serde(default)]
    pub discover_new_projects: bool,
    #[serde(default)]
    pub required_technologies: Vec<String>,
    #[serde(default)]
    pub job_domain: Option<String>,
}

fn parse_payload<T: serde::de::DeserializeOwned>(request: &JobRequest) -> Result<T> {
    serde_json::from_value(request.payload.clone()).map_err(|e| CoreError::InvalidPayload(e.to_string()))
}

fn check(limiter: &RateLimiter, name: &str, scope_key: &str) -> Result<()> {
    let decision = limiter.check_limit(name, scope_key)?;
    if !decision.allowed {
        return Err(RateLimiter::deny_error(name, &decision));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// resume_tailoring
// ---------------------------------------------------------------------------

pub struct ResumeTailoringHandler {
    pub deps: Arc<HandlerDeps>,
    pub tailor: Arc<dyn ResumeTailor>,
}

#[async_trait]
impl JobHandler for ResumeTailoringHandler {
    async fn execute(&self, request: &JobRequest, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let user_id = request.user_id;
        let payload: ResumeTailoringPayload = parse_payload(request)?;
        if payload.original_resume_url.is_empty() || payload.job_description.is_empty() {
            return Err(CoreError::InvalidPayload(
                "original_resume_url and job_description are required".into(),
            ));
        }

        check(&self.deps.limiter, "resume_tailoring_per_user_per_day", &user_id.to_string())?;

        let (ok, info) = self.deps.quota.can_make_request()?;
        if !ok {
            return Err(CoreError::QuotaExceeded {
                reason: info.reason.unwrap_or_else(|| "quota exhausted".into()),
            });
        }
        let reservation = self.deps.quota.reserve_quota(user_id, request.priority.value())?;

        let service_login = match self.deps.vault.get_service_login(user_id) {
            Ok(login) => login,
            Err(e) => {
                warn!(target: "jobflow::handlers", user_id = %user_id, error = %e, "vault lookup failed");
                None
            }
        };
        if service_login.is_none() {
            warn!(target: "jobflow::handlers", user_id = %user_id, "no Q&A service credentials; tailoring with limited features");
        }

        let outcome = self
            .tailor
            .tailor(TailorRequest {
                original_resume_url: payload.original_resume_url,
                job_description: payload.job_description,
                job_title: payload.job_title.clone(),
                company: payload.company.clone(),
                credentials: payload.credentials,
                service_login,
                user_full_name: payload.user_full_name,
            })
            .await;

        // Reservation is released on every exit path.
        self.deps.quota.release_quota(reservation)?;

        match outcome {
            Ok(tailored_url) => {
                // Admission was through the quota manager; record actual
                // consumption on the observability counters.
                self.deps.limiter.increment_usage("gemini_requests_per_minute", "global")?;
                self.deps.limiter.increment_usage("gemini_requests_per_day", "global")?;

                self.deps.audit_success(
                    user_id,
                    "resume_tailoring",
                    started,
                    json!({ "job_title": payload.job_title, "company": payload.company }),
                );
                info!(target: "jobflow::handlers", user_id = %user_id, "resume tailoring completed");
                Ok(json!({
                    "success": true,
                    "tailored_resume_url": tailored_url,
                    "job_title": payload.job_title,
                    "company": payload.company,
                    "execution_time": started.elapsed().as_secs_f64(),
                }))
            }
            Err(e) => {
                self.deps.audit_failure(user_id, "resume_tailoring_failed", started, &e);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// job_application
// ---------------------------------------------------------------------------

pub struct JobApplicationHandler {
    pub deps: Arc<HandlerDeps>,
    pub runner: Arc<dyn ApplicationRunner>,
}

#[async_trait]
impl JobHandler for JobApplicationHandler {
    async fn execute(&self, request: &JobRequest, cancel: &CancelProbe) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let user_id = request.user_id;
        let payload: JobApplicationPayload = parse_payload(request)?;
        if payload.job_url.is_empty() || payload.resume_url.is_empty() {
            return Err(CoreError::InvalidPayload("job_url and resume_url are required".into()));
        }

        check(&self.deps.limiter, "job_applications_per_user_per_day", &user_id.to_string())?;

        // Concurrent browser sessions are a bounded slot; held until the run
        // finishes on any path.
        let scope = user_id.to_string();
        let concurrent = self.deps.limiter.check_limit("concurrent_job_applications", &scope)?;
        if !concurrent.allowed {
            return Err(CoreError::LimitDenied {
                name: "concurrent_job_applications".into(),
                retry_after_secs: 60,
            });
        }

        let resume_url = match (payload.use_tailored, payload.tailored_resume_url.as_deref()) {
            (true, Some(url)) if !url.is_empty() => url.to_string(),
            _ => payload.resume_url.clone(),
        };

        let outcome = self
            .runner
            .run(
                ApplicationRun {
                    user_id,
                    job_url: payload.job_url.clone(),
                    resume_url,
                },
                cancel,
            )
            .await;

        self.deps.limiter.release("concurrent_job_applications", &scope)?;

        match outcome {
            Ok(result) => {
                self.deps.audit_success(
                    user_id,
                    "job_application",
                    started,
                    json!({ "job_url": payload.job_url, "use_tailored": payload.use_tailored }),
                );
                Ok(json!({
                    "success": true,
                    "job_url": payload.job_url,
                    "result": result,
                    "execution_time": started.elapsed().as_secs_f64(),
                }))
            }
            Err(e) => {
                self.deps.audit_failure(user_id, "job_application_failed", started, &e);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// job_search
// ---------------------------------------------------------------------------

pub struct JobSearchHandler {
    pub deps: Arc<HandlerDeps>,
    pub discovery: Arc<dyn JobDiscovery>,
}

#[async_trait]
impl JobHandler for JobSearchHandler {
    async fn execute(&self, request: &JobRequest, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let user_id = request.user_id;
        let payload: JobSearchPayload = parse_payload(request)?;

        check(&self.deps.limiter, "job_search_per_user_per_day", &user_id.to_string())?;

        match self.discovery.search_and_save(user_id, payload.min_relevance_score).await {
            Ok(report) => {
                self.deps.audit_success(
                    user_id,
                    "job_search",
                    started,
                    json!({
                        "min_relevance_score": payload.min_relevance_score,
                        "jobs_found": report.count,
                    }),
                );
                info!(target: "jobflow::handlers", user_id = %user_id, jobs = report.count, "job search completed");
                Ok(json!({
                    "success": true,
                    "jobs": report.jobs,
                    "total_found": report.count,
                    "sources": report.sources,
                    "average_score": report.average_score,
                    "saved_count": report.saved_count,
                    "updated_count": report.updated_count,
                    "execution_time": started.elapsed().as_secs_f64(),
                }))
            }
            Err(e) => {
                self.deps.audit_failure(user_id, "job_search_failed", started, &e);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// project_analysis
// ---------------------------------------------------------------------------

pub struct ProjectAnalysisHandler {
    pub deps: Arc<HandlerDeps>,
    pub projects: Arc<dyn ProjectSource>,
    pub qa: Arc<dyn QaService>,
}

impl ProjectAnalysisHandler {
    /// Asks the Q&A service about experience areas the resume does not yet
    /// cover and wraps answers as candidate projects. Best-effort: any
    /// failure just yields no discoveries.
    async fn discover_projects(
        &self,
        user_id: Uuid,
        payload: &ProjectAnalysisPayload,
        current: &[ProjectRecord],
    ) -> Vec<serde_json::Value> {
        let Ok(Some(login)) = self.deps.vault.get_service_login(user_id) else {
            info!(target: "jobflow::handlers", user_id = %user_id, "no Q&A credentials; skipping project discovery");
            return Vec::new();
        };
        if let Err(e) = self.qa.authenticate(&login).await {
            warn!(target: "jobflow::handlers", user_id = %user_id, error = %e, "Q&A authentication failed");
            return Vec::new();
        }

        let covered: Vec<String> = current.iter().map(|p| p.name.to_lowercase()).collect();
        let questions: Vec<String> = payload
            .job_keywords
            .iter()
            .filter(|kw| !covered.iter().any(|name| name.contains(&kw.to_lowercase())))
            .take(8)
            .map(|kw| {
                format!(
                    "Have you built anything involving {}? Describe the project, your role, and the technologies used.",
                    kw
                )
            })
            .collect();
        if questions.is_empty() {
            return Vec::new();
        }

        let answers = match self.qa.ask_batch(&questions).await {
            Ok(answers) => answers,
            Err(e) => {
                warn!(target: "jobflow::handlers", user_id = %user_id, error = %e, "Q&A batch failed");
                return Vec::new();
            }
        };

        questions
            .iter()
            .zip(answers)
            .filter(|(_, answer)| answer.len() > 40 && !answer.to_lowercase().contains("i don't"))
            .map(|(question, answer)| {
                json!({
                    "prompt": question,
                    "description": answer,
                    "source": "qa_discovery",
                })
            })
            .collect()
    }
}

#[async_trait]
impl JobHandler for ProjectAnalysisHandler {
    async fn execute(&self, request: &JobRequest, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let user_id = request.user_id;
        let payload: ProjectAnalysisPayload = parse_payload(request)?;
        if payload.job_description.is_empty() {
            return Err(CoreError::InvalidPayload("job_description is required".into()));
        }

        let reservation = self.deps.quota.reserve_quota(user_id, request.priority.value())?;

        let result: Result<serde_json::Value> = async {
            let projects = self.projects.projects_for_user(user_id).await?;
            if projects.is_empty() {
                return Err(CoreError::InvalidPayload("no projects found for this user".into()));
            }

            let today = chrono::Utc::now().date_naive();
            let ranked = relevance::rank_projects(
                &projects,
                &payload.job_keywords,
                &payload.required_technologies,
                payload.job_domain.as_deref(),
                today,
            );
            let swaps = relevance::recommend_swaps(
                &projects,
                &payload.job_keywords,
                &payload.required_technologies,
                payload.job_domain.as_deref(),
                today,
            );

            let (current, alternatives): (Vec<_>, Vec<_>) =
                ranked.into_iter().partition(|(p, _)| p.is_on_resume);
            let current_projects: Vec<ProjectRecord> = current.iter().map(|(p, _)| p.clone()).collect();

            let discovered = if payload.discover_new_projects {
                self.discover_projects(user_id, &payload, &current_projects).await
            } else {
                Vec::new()
            };

            let as_json = |items: Vec<(ProjectRecord, relevance::RelevanceScores)>| -> Vec<serde_json::Value> {
                items
                    .into_iter()
                    .map(|(p, s)| json!({ "project": p, "scores": s }))
                    .collect()
            };

            Ok(json!({
                "success": true,
                "current_projects": as_json(current),
                "alternative_projects": as_json(alternatives),
                "swap_recommendations": swaps,
                "discovered_projects": discovered,
                "execution_time": started.elapsed().as_secs_f64(),
            }))
        }
        .await;

        self.deps.quota.release_quota(reservation)?;

        match result {
            Ok(value) => {
                let analyzed = value
                    .get("current_projects")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0)
                    + value
                        .get("alternative_projects")
                        .and_then(|v| v.as_array())
                        .map(|a| a.len())
                        .unwrap_or(0);
                self.deps.audit_success(user_id, "project_analysis", started, json!({ "projects_analyzed": analyzed }));
                Ok(value)
            }
            Err(e) => {
                self.deps.audit_failure(user_id, "project_analysis_failed", started, &e);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registration and submission helpers
// ---------------------------------------------------------------------------

/// External collaborators wired into the handler set.
pub struct Collaborators {
    pub tailor: Arc<dyn ResumeTailor>,
    pub runner: Arc<dyn ApplicationRunner>,
    pub discovery: Arc<dyn JobDiscovery>,
    pub projects: Arc<dyn ProjectSource>,
    pub qa: Arc<dyn QaService>,
}

/// Registers the four platform handlers on the queue.
pub fn register_all(queue: &JobQueue, deps: Arc<HandlerDeps>, collaborators: Collaborators) {
    queue.register_handler(
        job_type::RESUME_TAILORING,
        Arc::new(ResumeTailoringHandler {
            deps: Arc::clone(&deps),
            tailor: collaborators.tailor,
        }),
    );
    queue.register_handler(
        job_type::JOB_APPLICATION,
        Arc::new(JobApplicationHandler {
            deps: Arc::clone(&deps),
            runner: collaborators.runner,
        }),
    );
    queue.register_handler(
        job_type::JOB_SEARCH,
        Arc::new(JobSearchHandler {
            deps: Arc::clone(&deps),
            discovery: collaborators.discovery,
        }),
    );
    queue.register_handler(
        job_type::PROJECT_ANALYSIS,
        Arc::new(ProjectAnalysisHandler {
            deps,
            projects: collaborators.projects,
            qa: collaborators.qa,
        }),
    );
}

/// Submits a resume-tailoring job with its default priority and deadline.
pub fn submit_resume_tailoring_job(queue: &JobQueue, user_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
    queue.submit_job(
        user_id,
        job_type::RESUME_TAILORING,
        payload,
        JobPriority::Normal,
        None,
        timeouts::RESUME_TAILORING_SECS,
    )
}

/// Submits a job-application job with its default priority and deadline.
pub fn submit_job_application_job(queue: &JobQueue, user_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
    queue.submit_job(
        user_id,
        job_type::JOB_APPLICATION,
        payload,
        JobPriority::Normal,
        None,
        timeouts::JOB_APPLICATION_SECS,
    )
}

/// Submits a job-search job. Discovery is batch work, so it runs low priority.
pub fn submit_job_search_job(queue: &JobQueue, user_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
    queue.submit_job(
        user_id,
        job_type::JOB_SEARCH,
        payload,
        JobPriority::Low,
        None,
        timeouts::JOB_SEARCH_SECS,
    )
}

/// Submits a project-analysis job with its default priority and deadline.
pub fn submit_project_analysis_job(queue: &JobQueue, user_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
    queue.submit_job(
        user_id,
        job_type::PROJECT_ANALYSIS,
        payload,
        JobPriority::Normal,
        None,
        timeouts::PROJECT_ANALYSIS_SECS,
    )
}
