//! Application runner wiring.
//!
//! With the `browser` feature, job-application jobs drive a real Chromium
//! session through the form engine: one isolated session per job (profile
//! dir namespaced by user id), iterating the fill loop page by page until
//! no Next button remains. Without the feature, the handler reports the
//! runner as unconfigured.

use jobflow_core::config::CoreConfig;
use jobflow_core::error::{CoreError, Result};
use jobflow_core::handlers::{ApplicationRun, ApplicationRunner};
use jobflow_core::queue::CancelProbe;
use std::sync::Arc;

pub fn application_runner(config: &CoreConfig) -> Arc<dyn ApplicationRunner> {
    #[cfg(feature = "browser")]
    {
        Arc::new(BrowserRunner {
            sessions_dir: config.data_path.join("sessions"),
        })
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = config;
        Arc::new(NoBrowser)
    }
}

#[cfg(not(feature = "browser"))]
struct NoBrowser;

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl ApplicationRunner for NoBrowser {
    async fn run(&self, _request: ApplicationRun, _cancel: &CancelProbe) -> Result<serde_json::Value> {
        Err(CoreError::Config(
            "browser runner not compiled in (build with --features browser)".into(),
        ))
    }
}

#[cfg(feature = "browser")]
struct BrowserRunner {
    sessions_dir: std::path::PathBuf,
}

#[cfg(feature = "browser")]
#[async_trait::async_trait]
impl ApplicationRunner for BrowserRunner {
    async fn run(&self, request: ApplicationRun, cancel: &CancelProbe) -> Result<serde_json::Value> {
        use jobflow_form::orchestrator::FormFiller;
        use jobflow_form::page::cdp::CdpBrowserSession;
        use jobflow_core::profile::Profile;

        // One browser profile per user; sessions are never shared.
        let user_dir = self.sessions_dir.join(request.user_id.to_string());
        std::fs::create_dir_all(&user_dir)?;
        let session = CdpBrowserSession::launch(&user_dir)
            .await
            .map_err(|e| CoreError::Config(format!("browser launch: {}", e)))?;

        let result: Result<serde_json::Value> = async {
            let page = session
                .open(&request.job_url)
                .await
                .map_err(|e| CoreError::Config(format!("open {}: {}", request.job_url, e)))?;

            let model = jobflow_core::gemini::GeminiClient::from_env();

            // Profiles are exported next to the store by the account
            // subsystem; fall back to a bare profile carrying the resume.
            let profile_path = self
                .sessions_dir
                .parent()
                .unwrap_or(&self.sessions_dir)
                .join("profiles")
                .join(format!("{}.json", request.user_id));
            let mut profile = std::fs::read_to_string(&profile_path)
                .ok()
                .and_then(|text| serde_json::from_str(&text).ok())
                .and_then(|json| Profile::from_json(json).ok())
                .unwrap_or_default();
            profile.set_text("resume_path", &request.resume_url);

            let mut pages_filled = 0usize;
            let mut reports = Vec::new();
            // Multi-page forms: keep filling until no Next button is found.
            loop {
                cancel.check()?;
                let mut filler = FormFiller::new(&page).with_cancel(cancel);
                if let Some(model) = model.as_ref() {
                    filler = filler.with_model(model);
                }
                let report = filler.fill_form(&profile).await;
                pages_filled += 1;
                let advanced = report.next_button_clicked;
                reports.push(serde_json::to_value(&report)?);
                if !advanced || pages_filled >= 20 {
                    break;
                }
            }
            Ok(serde_json::json!({
                "pages": pages_filled,
                "reports": reports,
            }))
        }
        .await;

        session.close().await;
        result
    }
}
