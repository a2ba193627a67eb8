//! Page-completion loop: detect fields, consolidate groups, fill through
//! the three-tier strategy (deterministic -> learned pattern -> model
//! batch), review the result, and advance to the next page.
//!
//! The loop runs up to five iterations per page, re-detecting each time so
//! dynamically revealed fields get picked up. Per-field strategy
//! progression lives in the attempt tracker; completed fields are keyed by
//! stable id so a static field is never written twice. The orchestrator
//! clicks Next/Continue controls only, never a submit control.

use crate::detmap;
use crate::error::FieldErrorKind;
use crate::field::{detect_fields, AttemptTracker, FieldCategory, FieldCompletion, FillMethod, FormField};
use crate::interact::{upload_resume_if_present, FieldInteractor};
use crate::llmmap::{AiMappingKind, LlmFieldMapper, ReviewResult};
use crate::page::Page;
use crate::questions::{consolidate_checkbox_groups, consolidate_radio_groups};
use crate::validator;
use jobflow_core::gemini::TextModel;
use jobflow_core::patterns::PatternStore;
use jobflow_core::profile::Profile;
use jobflow_core::queue::CancelProbe;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_ITERATIONS: usize = 5;

/// Fill counts per strategy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FieldsByMethod {
    pub deterministic: usize,
    pub learned_pattern: usize,
    pub ai: usize,
}

/// A field the loop gave up on, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedField {
    pub field: String,
    pub reason: String,
}

/// Outcome of one page's fill loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillReport {
    pub success: bool,
    pub total_fields_filled: usize,
    pub iterations: usize,
    pub fields_by_method: FieldsByMethod,
    pub errors: Vec<String>,
    pub requires_human: Vec<SkippedField>,
    pub skipped_fields: Vec<SkippedField>,
    /// Label -> value, in fill order. Input to the final review.
    pub filled_fields: Vec<(String, String)>,
    pub review: Option<ReviewResult>,
    pub next_button_clicked: bool,
}

impl FillReport {
    fn record_fill(&mut self, label: &str, value: &str, method: FillMethod) {
        match method {
            FillMethod::Deterministic => self.fields_by_method.deterministic += 1,
            FillMethod::LearnedPattern => self.fields_by_method.learned_pattern += 1,
            FillMethod::Ai => self.fields_by_method.ai += 1,
        }
        self.filled_fields.push((label.to_string(), value.to_string()));
    }

    fn skip_once(&mut self, label: &str, reason: &str) {
        if !self.skipped_fields.iter().any(|s| s.field == label) {
            self.skipped_fields.push(SkippedField {
                field: label.to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

/// The page-fill orchestrator. One instance per fill session.
pub struct FormFiller<'a> {
    page: &'a dyn Page,
    model: Option<&'a dyn TextModel>,
    patterns: Option<&'a PatternStore>,
    user_id: Option<Uuid>,
    cancel: Option<&'a CancelProbe>,
    completion: FieldCompletion,
    attempts: AttemptTracker,
    today: chrono::NaiveDate,
    dynamic_wait: Duration,
}

impl<'a> FormFiller<'a> {
    pub fn new(page: &'a dyn Page) -> Self {
        Self {
            page,
            model: None,
            patterns: None,
            user_id: None,
            cancel: None,
            completion: FieldCompletion::new(),
            attempts: AttemptTracker::new(),
            today: chrono::Utc::now().date_naive(),
            dynamic_wait: Duration::from_secs(1),
        }
    }

    pub fn with_model(mut self, model: &'a dyn TextModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_patterns(mut self, patterns: &'a PatternStore, user_id: Option<Uuid>) -> Self {
        self.patterns = Some(patterns);
        self.user_id = user_id;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelProbe) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Overrides "today" for date-arithmetic rules.
    pub fn with_today(mut self, today: chrono::NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Shortens the dynamic-content wait (tests).
    pub fn with_dynamic_wait(mut self, wait: Duration) -> Self {
        self.dynamic_wait = wait;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.map(|c| c.is_cancelled()).unwrap_or(false)
    }

    /// Fills the current page. See the module docs for the loop shape.
    pub async fn fill_form(&self, profile: &Profile) -> FillReport {
        info!(target: "jobflow::filler", url = %self.page.url(), "starting form fill");
        self.completion.set_current_page(&self.page.url());
        let mut report = FillReport::default();
        let interactor = FieldInteractor::new(self.page);
        let mut last_detected: Vec<FormField> = Vec::new();

        for iteration in 0..MAX_ITERATIONS {
            report.iterations = iteration + 1;
            if self.cancelled() {
                report.errors.push("fill loop cancelled".into());
                break;
            }
            debug!(target: "jobflow::filler", iteration = iteration + 1, "fill iteration");

            if iteration == 0 {
                self.try_resume_upload(profile).await;
            }

            // Detect fast: dropdown options are discovered inside the
            // vendor drivers, not here.
            let fields = match detect_fields(self.page, false).await {
                Ok(fields) => fields,
                Err(e) => {
                    report.errors.push(e.to_string());
                    break;
                }
            };
            let fields = match consolidate_radio_groups(self.page, fields).await {
                Ok(fields) => fields,
                Err(e) => {
                    report.errors.push(e.to_string());
                    break;
                }
            };
            let fields = match consolidate_checkbox_groups(self.page, fields).await {
                Ok(fields) => fields,
                Err(e) => {
                    report.errors.push(e.to_string());
                    break;
                }
            };
            let fields = self.clean_fields(fields).await;
            last_detected = fields.clone();

            let unfilled: Vec<FormField> = fields
                .into_iter()
                .filter(|f| !self.completion.is_completed(&f.tracker_id()) && !f.is_filled)
                .collect();
            if unfilled.is_empty() {
                info!(target: "jobflow::filler", "all fields processed");
                report.success = true;
                break;
            }
            debug!(target: "jobflow::filler", remaining = unfilled.len(), "fields remain to fill");

            let filled_this_round = self.process_fields(&interactor, &unfilled, profile, &mut report).await;
            if filled_this_round == 0 {
                warn!(target: "jobflow::filler", "no progress this iteration");
                break;
            }
            tokio::time::sleep(self.dynamic_wait).await;
        }

        // Final review and at-most-one corrective pass.
        if !report.filled_fields.is_empty() {
            if let Some(model) = self.model {
                let mapper = LlmFieldMapper::new(model);
                let mut review = mapper.final_review(&report.filled_fields, profile).await;
                if !review.approved {
                    warn!(target: "jobflow::filler", issues = ?review.issues, "review flagged issues");
                    let corrected = self
                        .apply_corrections(&mapper, &review, &last_detected, profile, &mut report)
                        .await;
                    if corrected > 0 {
                        review = mapper.final_review(&report.filled_fields, profile).await;
                    }
                    report.success = review.approved;
                }
                report.review = Some(review);
            }
        }

        report.total_fields_filled = report.filled_fields.len();
        info!(
            target: "jobflow::filler",
            filled = report.total_fields_filled,
            iterations = report.iterations,
            deterministic = report.fields_by_method.deterministic,
            learned = report.fields_by_method.learned_pattern,
            ai = report.fields_by_method.ai,
            "form fill finished"
        );

        report.next_button_clicked = self.try_click_next_button().await;
        report
    }

    async fn try_resume_upload(&self, profile: &Profile) {
        let Some(path) = profile.text("resume_path").map(PathBuf::from) else {
            return;
        };
        match upload_resume_if_present(self.page, &path, profile, self.model).await {
            Ok(true) => info!(target: "jobflow::filler", "resume uploaded"),
            Ok(false) => debug!(target: "jobflow::filler", "no resume upload control found"),
            Err(e) => warn!(target: "jobflow::filler", error = %e, "resume upload failed"),
        }
    }

    /// Drops listbox containers and disabled controls. (Hidden controls are
    /// already excluded at detection.)
    async fn clean_fields(&self, fields: Vec<FormField>) -> Vec<FormField> {
        let mut cleaned = Vec::new();
        for field in fields {
            if field.label.trim().is_empty() && field.stable_id.is_empty() {
                continue;
            }
            if field.stable_id.to_lowercase().contains("listbox") {
                continue;
            }
            let role = field.element.attr("role").await.ok().flatten().unwrap_or_default();
            if role == "listbox" {
                continue;
            }
            if !field.element.is_enabled().await.unwrap_or(true) {
                continue;
            }
            cleaned.push(field);
        }
        cleaned
    }

    /// Phase 1 deterministic, phase 1.5 learned patterns, phase 2 one model
    /// batch. Returns how many fields were filled.
    async fn process_fields(
        &self,
        interactor: &FieldInteractor<'_>,
        fields: &[FormField],
        profile: &Profile,
        report: &mut FillReport,
    ) -> usize {
        let mut filled = 0usize;
        let mut needs_learned: Vec<&FormField> = Vec::new();

        for field in fields {
            let field_id = field.tracker_id();
            match self.attempts.next_method(&field_id) {
                None => {
                    if !self.attempts.requires_human_input(&field_id) {
                        report.skip_once(&field.label, "all strategies attempted, field still empty");
                    }
                }
                Some(FillMethod::Deterministic) => {
                    let ok = self.try_deterministic(interactor, field, profile, report).await;
                    self.attempts.mark_attempted(&field_id, FillMethod::Deterministic);
                    if ok {
                        filled += 1;
                    } else {
                        needs_learned.push(field);
                    }
                }
                Some(FillMethod::LearnedPattern) => needs_learned.push(field),
                Some(FillMethod::Ai) => needs_learned.push(field),
            }
        }

        let mut needs_ai: Vec<&FormField> = Vec::new();
        for field in needs_learned {
            let field_id = field.tracker_id();
            if self.attempts.has_attempted(&field_id, FillMethod::LearnedPattern) {
                if !self.attempts.has_attempted(&field_id, FillMethod::Ai) {
                    needs_ai.push(field);
                }
                continue;
            }
            let ok = self.try_learned_pattern(interactor, field, profile, report).await;
            self.attempts.mark_attempted(&field_id, FillMethod::LearnedPattern);
            if ok {
                filled += 1;
            } else if !self.attempts.has_attempted(&field_id, FillMethod::Ai) {
                needs_ai.push(field);
            }
        }

        if !needs_ai.is_empty() {
            filled += self.try_ai_batch(interactor, &needs_ai, profile, report).await;
        }
        filled
    }

    async fn fill_with(
        &self,
        interactor: &FieldInteractor<'_>,
        field: &FormField,
        value: &str,
        profile: &Profile,
        method: FillMethod,
        report: &mut FillReport,
    ) -> bool {
        let outcome = interactor.fill_field(field, value, profile).await;
        if outcome.success {
            report.record_fill(&field.label, value, method);
            self.completion.mark_completed(&field.tracker_id(), value);
            true
        } else {
            if let Some(FieldErrorKind::RequiresHumanInput) = outcome.error_kind {
                self.attempts.mark_needs_human(&field.tracker_id());
                report.requires_human.push(SkippedField {
                    field: field.label.clone(),
                    reason: outcome.error.unwrap_or_default(),
                });
            }
            false
        }
    }

    async fn try_deterministic(
        &self,
        interactor: &FieldInteractor<'_>,
        field: &FormField,
        profile: &Profile,
        report: &mut FillReport,
    ) -> bool {
        let option_texts: Vec<String> = field.options.iter().map(|o| o.text.clone()).collect();
        let Some(mapping) = detmap::map_field(&field.label, field.category, &option_texts, profile, self.today)
        else {
            return false;
        };
        if mapping.confidence < 0.5 {
            return false;
        }
        let cleaned = validator::clean(&mapping.value, &field.label, field.category);
        if cleaned.is_empty() {
            // The validator vetoed the value; only a human can answer this.
            self.attempts.mark_needs_human(&field.tracker_id());
            report.requires_human.push(SkippedField {
                field: field.label.clone(),
                reason: "value rejected by validation".into(),
            });
            return false;
        }
        debug!(
            target: "jobflow::filler",
            label = %field.label,
            value = %cleaned,
            method = ?mapping.method,
            "deterministic mapping"
        );
        self.fill_with(interactor, field, &cleaned, profile, FillMethod::Deterministic, report)
            .await
    }

    async fn try_learned_pattern(
        &self,
        interactor: &FieldInteractor<'_>,
        field: &FormField,
        profile: &Profile,
        report: &mut FillReport,
    ) -> bool {
        let Some(patterns) = self.patterns else {
            return false;
        };
        let pattern = match patterns.lookup(self.user_id, &field.label, field.category.as_str()) {
            Ok(Some(pattern)) => pattern,
            _ => return false,
        };
        let Some(value) = profile.render(&pattern.profile_field) else {
            // Known mapping but no profile data: decay its confidence.
            let _ = patterns.record(self.user_id, &field.label, field.category.as_str(), &pattern.profile_field, false);
            return false;
        };
        let cleaned = validator::clean(&value, &field.label, field.category);
        if cleaned.is_empty() {
            return false;
        }
        let ok = self
            .fill_with(interactor, field, &cleaned, profile, FillMethod::LearnedPattern, report)
            .await;
        let _ = patterns.record(self.user_id, &field.label, field.category.as_str(), &pattern.profile_field, ok);
        if ok {
            info!(
                target: "jobflow::filler",
                label = %field.label,
                profile_field = %pattern.profile_field,
                confidence = pattern.confidence,
                "filled from learned pattern"
            );
        }
        ok
    }

    async fn try_ai_batch(
        &self,
        interactor: &FieldInteractor<'_>,
        fields: &[&FormField],
        profile: &Profile,
        report: &mut FillReport,
    ) -> usize {
        let Some(model) = self.model else {
            for field in fields {
                self.attempts.mark_attempted(&field.tracker_id(), FillMethod::Ai);
                report.skip_once(&field.label, "no model configured");
            }
            return 0;
        };
        let mapper = LlmFieldMapper::new(model);
        let owned: Vec<FormField> = fields.iter().map(|f| (*f).clone()).collect();
        let mappings = match mapper.map_fields(&owned, profile).await {
            Ok(mappings) => mappings,
            Err(e) => {
                warn!(target: "jobflow::filler", error = %e, "batch mapping failed");
                for field in fields {
                    self.attempts.mark_attempted(&field.tracker_id(), FillMethod::Ai);
                }
                return 0;
            }
        };

        let mut filled = 0usize;
        for field in fields {
            let field_id = field.tracker_id();
            let Some(mapping) = mappings.get(&field_id) else {
                self.attempts.mark_attempted(&field_id, FillMethod::Ai);
                report.skip_once(&field.label, "model did not provide a mapping");
                continue;
            };

            if mapping.kind == AiMappingKind::NeedsHumanInput {
                self.attempts.mark_needs_human(&field_id);
                report.requires_human.push(SkippedField {
                    field: field.label.clone(),
                    reason: if mapping.value.is_empty() {
                        "model flagged for human input".into()
                    } else {
                        mapping.value.clone()
                    },
                });
                continue;
            }
            self.attempts.mark_attempted(&field_id, FillMethod::Ai);

            let mut value = match mapping.kind {
                AiMappingKind::Manual => {
                    match mapper
                        .generate_text_response(
                            &field.label,
                            field.category == FieldCategory::Textarea,
                            profile,
                            &mapping.value,
                        )
                        .await
                    {
                        Ok(text) if !text.is_empty() => text,
                        _ => {
                            report.skip_once(&field.label, "text generation failed");
                            continue;
                        }
                    }
                }
                _ => mapping.value.clone(),
            };
            if value.is_empty() {
                report.skip_once(&field.label, "model returned an empty value");
                continue;
            }

            // Generated prose aimed at a file-upload control becomes a
            // temporary document first.
            if field.category == FieldCategory::FileUpload
                && value.len() > 100
                && !value.to_lowercase().ends_with(".pdf")
                && !value.to_lowercase().ends_with(".doc")
                && !value.to_lowercase().ends_with(".docx")
                && !value.to_lowercase().ends_with(".txt")
            {
                match write_temp_document(&field.label, &value) {
                    Ok(path) => value = path.display().to_string(),
                    Err(e) => {
                        report.skip_once(&field.label, &format!("could not write document: {}", e));
                        continue;
                    }
                }
            }

            let cleaned = if mapping.kind == AiMappingKind::Manual || field.category == FieldCategory::Textarea {
                value.clone()
            } else {
                let cleaned = validator::clean(&value, &field.label, field.category);
                if cleaned.is_empty() {
                    report.skip_once(&field.label, "model value rejected by validation");
                    continue;
                }
                cleaned
            };

            if self
                .fill_with(interactor, field, &cleaned, profile, FillMethod::Ai, report)
                .await
            {
                filled += 1;
                // Remember confirmed model mappings for next time.
                if mapping.kind != AiMappingKind::Manual {
                    if let (Some(patterns), Some(profile_field)) = (self.patterns, &mapping.profile_field) {
                        let _ = patterns.record(self.user_id, &field.label, field.category.as_str(), profile_field, true);
                    }
                }
            } else {
                report.skip_once(&field.label, "model provided a value but the fill failed");
            }
        }
        filled
    }

    /// Applies the corrective pass; returns how many fields changed.
    async fn apply_corrections(
        &self,
        mapper: &LlmFieldMapper<'_>,
        review: &ReviewResult,
        detected: &[FormField],
        profile: &Profile,
        report: &mut FillReport,
    ) -> usize {
        let corrections = match mapper.request_corrections(&review.issues, &report.filled_fields, profile).await {
            Ok(corrections) => corrections,
            Err(e) => {
                warn!(target: "jobflow::filler", error = %e, "corrections call failed");
                return 0;
            }
        };
        let interactor = FieldInteractor::new(self.page);
        let mut applied = 0usize;
        for correction in corrections {
            let Some(field) = detected.iter().find(|f| f.label == correction.field_name) else {
                continue;
            };
            // Clear first so the already-filled skip cannot block the
            // rewrite; an empty corrected_value just leaves the field clear.
            let _ = field.element.clear().await;
            if correction.corrected_value.is_empty() {
                applied += 1;
                if let Some(entry) = report.filled_fields.iter_mut().find(|(label, _)| label == &field.label) {
                    entry.1.clear();
                }
                continue;
            }
            let outcome = interactor.fill_field(field, &correction.corrected_value, profile).await;
            if outcome.success {
                applied += 1;
                info!(
                    target: "jobflow::filler",
                    label = %field.label,
                    value = %correction.corrected_value,
                    reason = %correction.reason,
                    "correction applied"
                );
                if let Some(entry) = report.filled_fields.iter_mut().find(|(label, _)| label == &field.label) {
                    entry.1 = correction.corrected_value.clone();
                }
            }
        }
        applied
    }

    /// Finds and clicks a Next/Continue control. Submit-looking controls
    /// are never clicked under any circumstances.
    async fn try_click_next_button(&self) -> bool {
        static SUBMIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
            [
                r"\bsubmit\b",
                r"\bapply\b",
                r"\bsend\s+application\b",
                r"\bfinish\b",
                r"\bcomplete\s+application\b",
                r"\breview\s+and\s+submit\b",
                r"\bconfirm\s+and\s+submit\b",
            ]
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
            .collect()
        });
        static NEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
            [
                r"\bnext\b",
                r"\bcontinue\b",
                r"\bproceed\b",
                r"\bgo\s+to\s+next\b",
                r"\bsave\s+and\s+continue\b",
                r"\bsave\s+and\s+next\b",
                r"\bsave\s*&\s*continue\b",
                r"\bsave\s*&\s*next\b",
                r"\bnext\s+step\b",
                r"\bnext\s+page\b",
                r"^>\s*$",
                r"^→\s*$",
            ]
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
            .collect()
        });

        let buttons = match self
            .page
            .query_all("button, input[type=\"button\"], input[type=\"submit\"], a[role=\"button\"]")
            .await
        {
            Ok(buttons) => buttons,
            Err(_) => return false,
        };
        let mut visible_texts = Vec::new();
        for button in buttons {
            if !button.is_visible().await.unwrap_or(false) {
                continue;
            }
            let text = button.text().await.unwrap_or_default();
            let aria = button.attr("aria-label").await.ok().flatten().unwrap_or_default();
            let combined = format!("{} {}", text, aria).trim().to_lowercase();
            if combined.is_empty() {
                continue;
            }
            visible_texts.push(combined.clone());

            if SUBMIT_PATTERNS.iter().any(|p| p.is_match(&combined)) {
                debug!(target: "jobflow::filler", button = %combined, "skipping submit button");
                continue;
            }
            if NEXT_PATTERNS.iter().any(|p| p.is_match(&combined)) {
                info!(target: "jobflow::filler", button = %combined, "clicking next button");
                if button.click().await.is_ok() {
                    tokio::time::sleep(self.dynamic_wait).await;
                    return true;
                }
            }
        }
        info!(target: "jobflow::filler", buttons = ?visible_texts, "no next button found");
        false
    }
}

/// Writes generated prose into a temp `.txt` so it can satisfy a document
/// upload control.
fn write_temp_document(label: &str, content: &str) -> std::io::Result<PathBuf> {
    let safe: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_' || *c == '-')
        .take(30)
        .collect();
    let name = format!(
        "{}_{}.txt",
        safe.trim().replace(' ', "_"),
        uuid::Uuid::new_v4().simple()
    );
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}
