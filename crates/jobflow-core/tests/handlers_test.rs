//! Handler skeleton behavior with faked collaborators: limit admission,
//! quota release on every path, concurrent-slot release, and audit events.

use async_trait::async_trait;
use jobflow_core::audit::AuditLog;
use jobflow_core::error::{CoreError, Result};
use jobflow_core::handlers::*;
use jobflow_core::queue::{CancelProbe, JobHandler, JobPriority, JobRequest};
use jobflow_core::quota::{GeminiQuotaManager, QuotaConfig};
use jobflow_core::ratelimit::{LimitScope, RateLimitConfig, RateLimiter};
use jobflow_core::relevance::ProjectRecord;
use jobflow_core::store::KvStore;
use jobflow_core::vault::{CredentialVault, ServiceLogin};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    store: Arc<KvStore>,
    deps: Arc<HandlerDeps>,
}

fn fixture(tailoring_per_day: u64) -> Fixture {
    let store = Arc::new(KvStore::open_temporary().unwrap());
    let limiter = Arc::new(RateLimiter::with_limits(
        Arc::clone(&store),
        vec![
            RateLimitConfig {
                name: "resume_tailoring_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: tailoring_per_day,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "job_applications_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: 20,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "job_search_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: 10,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "concurrent_job_applications".into(),
                window_seconds: 0,
                max_count: 2,
                scope: LimitScope::Concurrent,
            },
            RateLimitConfig {
                name: "gemini_requests_per_minute".into(),
                window_seconds: 60,
                max_count: 60,
                scope: LimitScope::Global,
            },
            RateLimitConfig {
                name: "gemini_requests_per_day".into(),
                window_seconds: 86_400,
                max_count: 1500,
                scope: LimitScope::Global,
            },
        ],
    ));
    let quota = Arc::new(GeminiQuotaManager::new(
        Arc::clone(&store),
        QuotaConfig {
            per_minute_cap: 60,
            per_day_cap: 1500,
            headroom: 2,
            minute_window_secs: 60,
            day_window_secs: 86_400,
        },
    ));
    let deps = Arc::new(HandlerDeps {
        limiter,
        quota,
        audit: AuditLog::new(Arc::clone(&store)),
        vault: Arc::new(CredentialVault::with_key(Arc::clone(&store), &[9u8; 32])),
    });
    Fixture { store, deps }
}

fn request(user_id: Uuid, job_type: &str, payload: serde_json::Value) -> JobRequest {
    JobRequest {
        job_id: Uuid::new_v4(),
        user_id,
        job_type: job_type.into(),
        priority: JobPriority::Normal,
        payload,
        created_at: chrono::Utc::now(),
        scheduled_at: None,
        timeout_seconds: 60,
        retry_count: 0,
        max_retries: 3,
    }
}

struct FakeTailor {
    calls: AtomicUsize,
}

#[async_trait]
impl ResumeTailor for FakeTailor {
    async fn tailor(&self, request: TailorRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://docs.example/{}-tailored", request.job_title.replace(' ', "-")))
    }
}

struct FakeRunner;

#[async_trait]
impl ApplicationRunner for FakeRunner {
    async fn run(&self, request: ApplicationRun, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        Ok(json!({ "pages": 2, "resume_url": request.resume_url }))
    }
}

struct FailingRunner;

#[async_trait]
impl ApplicationRunner for FailingRunner {
    async fn run(&self, _request: ApplicationRun, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        Err(CoreError::Llm("browser crashed".into()))
    }
}

struct FakeProjects;

#[async_trait]
impl ProjectSource for FakeProjects {
    async fn projects_for_user(&self, _user_id: Uuid) -> Result<Vec<ProjectRecord>> {
        Ok(vec![
            ProjectRecord {
                id: 1,
                name: "legacy blog".into(),
                description: "a small php site".into(),
                technologies: vec!["php".into()],
                is_on_resume: true,
                ..Default::default()
            },
            ProjectRecord {
                id: 2,
                name: "rust job orchestrator".into(),
                description: "queue and worker pool for llm orchestration in rust".into(),
                technologies: vec!["rust".into(), "tokio".into()],
                is_on_resume: false,
                ..Default::default()
            },
        ])
    }
}

struct FakeQa;

#[async_trait]
impl QaService for FakeQa {
    async fn authenticate(&self, _login: &ServiceLogin) -> Result<()> {
        Ok(())
    }

    async fn ask_batch(&self, questions: &[String]) -> Result<Vec<String>> {
        Ok(questions
            .iter()
            .map(|q| format!("Yes, I built a system for that: {} It used Rust and Postgres.", q))
            .collect())
    }
}

#[tokio::test]
async fn tailoring_succeeds_and_releases_quota() {
    let f = fixture(5);
    let handler = ResumeTailoringHandler {
        deps: Arc::clone(&f.deps),
        tailor: Arc::new(FakeTailor {
            calls: AtomicUsize::new(0),
        }),
    };
    let user = Uuid::new_v4();
    let req = request(
        user,
        "resume_tailoring",
        json!({
            "original_resume_url": "https://docs.example/resume",
            "job_description": "build rust services",
            "job_title": "Platform Engineer",
            "company": "ACME",
        }),
    );
    let value = handler.execute(&req, &CancelProbe::noop(Arc::clone(&f.store))).await.unwrap();
    assert_eq!(value["success"], true);
    assert!(value["tailored_resume_url"].as_str().unwrap().contains("tailored"));

    // Reservation released: nothing in flight, one consumed request.
    let (ok, info) = f.deps.quota.can_make_request().unwrap();
    assert!(ok);
    assert_eq!(info.minute_reserved, 0);
    assert_eq!(info.minute_used, 1);

    // Audit trail has the success event.
    let events = f.deps.audit.events_for_user(user).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "resume_tailoring");
}

#[tokio::test]
async fn tailoring_daily_limit_denies_with_retry_hint() {
    let f = fixture(1);
    let handler = ResumeTailoringHandler {
        deps: Arc::clone(&f.deps),
        tailor: Arc::new(FakeTailor {
            calls: AtomicUsize::new(0),
        }),
    };
    let user = Uuid::new_v4();
    let payload = json!({
        "original_resume_url": "https://docs.example/resume",
        "job_description": "desc",
    });
    handler
        .execute(&request(user, "resume_tailoring", payload.clone()), &CancelProbe::noop(Arc::clone(&f.store)))
        .await
        .unwrap();

    let err = handler
        .execute(&request(user, "resume_tailoring", payload), &CancelProbe::noop(Arc::clone(&f.store)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::LimitDenied { .. }));
    assert!(err.to_string().contains("limit exceeded"));
}

#[tokio::test]
async fn missing_tailoring_inputs_are_rejected() {
    let f = fixture(5);
    let handler = ResumeTailoringHandler {
        deps: Arc::clone(&f.deps),
        tailor: Arc::new(FakeTailor {
            calls: AtomicUsize::new(0),
        }),
    };
    let err = handler
        .execute(
            &request(Uuid::new_v4(), "resume_tailoring", json!({"job_description": "only this"})),
            &CancelProbe::noop(Arc::clone(&f.store)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPayload(_)));
}

#[tokio::test]
async fn application_releases_concurrent_slot_on_success_and_failure() {
    let f = fixture(5);
    let user = Uuid::new_v4();
    let payload = json!({
        "job_url": "https://jobs.example/1",
        "resume_url": "https://docs.example/resume.pdf",
        "use_tailored": true,
        "tailored_resume_url": "https://docs.example/tailored.pdf",
    });

    let ok_handler = JobApplicationHandler {
        deps: Arc::clone(&f.deps),
        runner: Arc::new(FakeRunner),
    };
    let value = ok_handler
        .execute(&request(user, "job_application", payload.clone()), &CancelProbe::noop(Arc::clone(&f.store)))
        .await
        .unwrap();
    // Tailored resume was preferred.
    assert_eq!(value["result"]["resume_url"], "https://docs.example/tailored.pdf");

    let failing = JobApplicationHandler {
        deps: Arc::clone(&f.deps),
        runner: Arc::new(FailingRunner),
    };
    let err = failing
        .execute(&request(user, "job_application", payload.clone()), &CancelProbe::noop(Arc::clone(&f.store)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("browser crashed"));

    // Both runs released their slots: two more can be taken back to back.
    for _ in 0..2 {
        let decision = f
            .deps
            .limiter
            .check_limit("concurrent_job_applications", &user.to_string())
            .unwrap();
        assert!(decision.allowed);
    }
}

#[tokio::test]
async fn project_analysis_ranks_swaps_and_discovers() {
    let f = fixture(5);
    let user = Uuid::new_v4();
    f.deps
        .vault
        .put_service_login(
            user,
            &ServiceLogin {
                email: "a@example.com".into(),
                password: "pw".into(),
            },
        )
        .unwrap();

    let handler = ProjectAnalysisHandler {
        deps: Arc::clone(&f.deps),
        projects: Arc::new(FakeProjects),
        qa: Arc::new(FakeQa),
    };
    let value = handler
        .execute(
            &request(
                user,
                "project_analysis",
                json!({
                    "job_description": "rust backend role",
                    "job_keywords": ["rust", "tokio", "queue"],
                    "required_technologies": ["rust"],
                    "discover_new_projects": true,
                }),
            ),
            &CancelProbe::noop(Arc::clone(&f.store)),
        )
        .await
        .unwrap();

    assert_eq!(value["success"], true);
    assert_eq!(value["current_projects"].as_array().unwrap().len(), 1);
    assert_eq!(value["alternative_projects"].as_array().unwrap().len(), 1);
    let swaps = value["swap_recommendations"].as_array().unwrap();
    assert_eq!(swaps.len(), 1);
    assert_eq!(swaps[0]["remove_name"], "legacy blog");
    assert!(!value["discovered_projects"].as_array().unwrap().is_empty());

    // Reservation released.
    assert_eq!(f.deps.quota.can_make_request().unwrap().1.minute_reserved, 0);
}
