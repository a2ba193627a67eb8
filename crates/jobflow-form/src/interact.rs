//! Per-field fill-and-verify executor. Routes a (field, value) pair to the
//! right interaction routine, verifies the result by reading the control
//! back, and reports a structured outcome the orchestrator can escalate on.
//!
//! Element identity: callers pass detected field records, but every fill
//! builds a *fresh* locator (`[id=..]`, then `tag[name=..]`, then the stored
//! handle) so DOM churn between detection and interaction cannot retarget
//! the write.

use crate::error::{FieldError, FieldErrorKind, FormResult};
use crate::field::{FieldCategory, FormField};
use crate::page::{attr_or_empty, ElementRef, Page};
use crate::widgets;
use jobflow_core::gemini::TextModel;
use jobflow_core::profile::Profile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-strategy deadline for dropdown drivers.
const DROPDOWN_DEADLINE: Duration = Duration::from_secs(8);

/// Result of one fill attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillOutcome {
    pub success: bool,
    pub method: String,
    pub final_value: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<FieldErrorKind>,
    pub time_ms: u64,
}

impl FillOutcome {
    fn ok(method: &str, final_value: impl Into<String>) -> Self {
        Self {
            success: true,
            method: method.into(),
            final_value: Some(final_value.into()),
            error: None,
            error_kind: None,
            time_ms: 0,
        }
    }

    fn failed(error: FieldError) -> Self {
        Self {
            success: false,
            method: String::new(),
            final_value: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind),
            time_ms: 0,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "yes" | "1" | "on" | "checked")
}

fn split_values(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Copies the candidate file next to itself under a clean
/// `First_Last_Resume.ext` style name so the ATS shows something readable.
pub fn create_clean_filename(original: &Path, profile: &Profile, file_type: &str) -> std::io::Result<PathBuf> {
    let first = profile.text("first_name").unwrap_or("Applicant");
    let last = profile.text("last_name").unwrap_or("");
    let extension = original.extension().and_then(|e| e.to_str()).unwrap_or("pdf");
    let stem = if last.is_empty() {
        format!("{}_{}.{}", first, file_type, extension)
    } else {
        format!("{}_{}_{}.{}", first, last, file_type, extension)
    };
    let clean = original.with_file_name(stem.replace(' ', "_"));
    if clean != original {
        std::fs::copy(original, &clean)?;
    }
    Ok(clean)
}

/// Executes individual field fills against a page.
pub struct FieldInteractor<'a> {
    page: &'a dyn Page,
}

impl<'a> FieldInteractor<'a> {
    pub fn new(page: &'a dyn Page) -> Self {
        Self { page }
    }

    /// Fresh locator preferring id, then name, then the stored handle.
    async fn fresh_element(&self, field: &FormField) -> FormResult<ElementRef> {
        if !field.id.is_empty() {
            if let Some(element) = self.page.query(&format!("[id=\"{}\"]", field.id)).await? {
                return Ok(element);
            }
        }
        if !field.name.is_empty() {
            let selector = match field.category {
                FieldCategory::Textarea => format!("textarea[name=\"{}\"]", field.name),
                c if c.is_dropdown() => format!("select[name=\"{}\"], input[name=\"{}\"]", field.name, field.name),
                _ => format!("input[name=\"{}\"]", field.name),
            };
            if let Some(element) = self.page.query(&selector).await? {
                return Ok(element);
            }
        }
        Ok(field.element.clone())
    }

    async fn is_already_filled(&self, element: &ElementRef, category: FieldCategory) -> bool {
        match category {
            FieldCategory::Checkbox | FieldCategory::Radio => element.is_checked().await.unwrap_or(false),
            FieldCategory::GreenhouseDropdown => {
                // Selection lives in a sibling display node, not the input.
                let Ok(Some(parent)) = element.parent().await else {
                    return false;
                };
                for selector in ["[class*=\"singleValue\"]", ".select__single-value", "div[data-value]"] {
                    if let Ok(displays) = parent.query_all(selector).await {
                        for display in displays {
                            if let Ok(text) = display.text().await {
                                let text = text.trim().to_string();
                                if !text.is_empty() && !text.to_lowercase().contains("select") {
                                    return true;
                                }
                            }
                        }
                    }
                }
                false
            }
            _ => !element.input_value().await.unwrap_or_default().trim().is_empty(),
        }
    }

    /// Fills one field. Never panics; every failure is a structured outcome.
    pub async fn fill_field(
        &self,
        field: &FormField,
        value: &str,
        profile: &Profile,
    ) -> FillOutcome {
        let started = std::time::Instant::now();
        let element = match self.fresh_element(field).await {
            Ok(element) => element,
            Err(e) => return FillOutcome::failed(e),
        };

        // Groups always route to their handler; the group routine itself
        // checks whether the right member is already selected.
        let grouped = matches!(field.category, FieldCategory::RadioGroup | FieldCategory::CheckboxGroup);
        if !grouped && self.is_already_filled(&element, field.category).await {
            info!(target: "jobflow::interact", label = %field.label, "already filled; skipping");
            // Report the *intended* value; the DOM copy may be truncated.
            let mut outcome = FillOutcome::ok("skipped_already_filled", value);
            outcome.time_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }

        let result = match field.category {
            FieldCategory::FileUpload => self.fill_file_upload(&element, value, &field.label, profile).await,
            FieldCategory::WorkdayMultiselect => self.fill_workday_multiselect(&element, value, &field.label).await,
            FieldCategory::GreenhouseDropdownMulti => {
                self.fill_greenhouse_multi(&element, value, &field.label).await
            }
            FieldCategory::Dropdown
            | FieldCategory::GreenhouseDropdown
            | FieldCategory::WorkdayDropdown
            | FieldCategory::LeverDropdown => {
                self.fill_dropdown(&element, value, &field.label, field.category).await
            }
            FieldCategory::AshbyButtonGroup => self.fill_ashby(&element, value, &field.label).await,
            FieldCategory::RadioGroup => self.fill_radio_group(field, value).await,
            FieldCategory::CheckboxGroup => self.fill_checkbox_group(field, value).await,
            FieldCategory::Checkbox => self.fill_checkbox(&element, value, &field.label).await,
            FieldCategory::Radio => self.fill_radio(&element, value, field).await,
            FieldCategory::Textarea => self.fill_textarea(&element, value, &field.label).await,
            FieldCategory::TextInput => self.fill_text_input(&element, value, &field.label).await,
        };

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => FillOutcome::failed(e),
        };
        outcome.time_ms = started.elapsed().as_millis() as u64;
        if outcome.success {
            info!(
                target: "jobflow::interact",
                label = %field.label,
                method = %outcome.method,
                time_ms = outcome.time_ms,
                "field filled"
            );
        } else {
            warn!(
                target: "jobflow::interact",
                label = %field.label,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                time_ms = outcome.time_ms,
                "field fill failed"
            );
        }
        outcome
    }

    async fn fill_text_input(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        let standard: FormResult<String> = async {
            element.clear().await?;
            element.fill(value).await?;
            Ok(element.input_value().await?)
        }
        .await;

        match standard {
            Ok(actual) if actual == value => Ok(FillOutcome::ok("text_fill", actual)),
            other => {
                // Overlays and controlled components block trusted input;
                // inject through the native setter instead.
                if let Ok(actual) = &other {
                    debug!(target: "jobflow::interact", label, actual = %actual, "text verify failed; injecting");
                }
                element.force_set_value(value).await?;
                let actual = element.input_value().await?;
                if actual == value {
                    Ok(FillOutcome::ok("javascript_injection", actual))
                } else {
                    Err(FieldError::verification(label, value, &actual))
                }
            }
        }
    }

    async fn fill_textarea(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        let standard: FormResult<String> = async {
            element.focus().await?;
            element.fill(value).await?;
            Ok(element.input_value().await?)
        }
        .await;

        match standard {
            Ok(actual) if actual == value => Ok(FillOutcome::ok("textarea_fill", actual)),
            _ => {
                element.force_set_value(value).await?;
                let _ = label;
                // The injected value is authoritative even if the read-back
                // lags a render cycle.
                Ok(FillOutcome::ok("javascript_injection_textarea", value))
            }
        }
    }

    async fn fill_checkbox(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        let want = truthy(value);
        element.set_checked(want).await?;
        let checked = element.is_checked().await?;
        if checked == want {
            Ok(FillOutcome::ok(
                if want { "check" } else { "uncheck" },
                if want { "checked" } else { "unchecked" },
            ))
        } else {
            Err(FieldError::verification(
                label,
                if want { "checked" } else { "unchecked" },
                if checked { "checked" } else { "unchecked" },
            ))
        }
    }

    /// Does this radio's own labeling match the wanted option?
    async fn radio_matches(element: &ElementRef, field: &FormField, value: &str) -> bool {
        let wanted = value.to_lowercase();
        let mut candidates = vec![field.option_label.to_lowercase(), field.label.to_lowercase()];
        candidates.push(attr_or_empty(element.as_ref(), "aria-label").await.to_lowercase());
        candidates.push(attr_or_empty(element.as_ref(), "value").await.to_lowercase());
        candidates
            .iter()
            .any(|c| !c.is_empty() && (c == &wanted || c.contains(&wanted) || wanted.contains(c)))
    }

    async fn click_radio(&self, element: &ElementRef, label: &str) -> FormResult<()> {
        if element.click().await.is_ok() {
            return Ok(());
        }
        debug!(target: "jobflow::interact", label, "radio click blocked; using script click");
        element.js_click().await
    }

    async fn fill_radio(&self, element: &ElementRef, value: &str, field: &FormField) -> FormResult<FillOutcome> {
        if !Self::radio_matches(element, field, value).await {
            return Err(FieldError::new(
                FieldErrorKind::VerificationFailed,
                &field.label,
                format!("radio option does not match '{}'", value),
            ));
        }
        self.click_radio(element, &field.label).await?;
        if element.is_checked().await? {
            Ok(FillOutcome::ok("radio_click", value))
        } else {
            Err(FieldError::verification(&field.label, "checked", "unchecked"))
        }
    }

    /// Picks the group member whose option label best matches `value`:
    /// exact scores 100, containment with a length ratio >= 0.5 scores 80.
    async fn fill_radio_group(&self, field: &FormField, value: &str) -> FormResult<FillOutcome> {
        if field.individual_radios.is_empty() {
            return Err(FieldError::new(
                FieldErrorKind::Other,
                &field.label,
                "no individual radio buttons in group",
            ));
        }
        let wanted = value.to_lowercase().trim().to_string();
        let mut best: Option<(&FormField, i32)> = None;
        for member in &field.individual_radios {
            let option = if member.option_label.is_empty() {
                member.label.to_lowercase()
            } else {
                member.option_label.to_lowercase()
            };
            let option = option.trim().to_string();
            if option.is_empty() {
                continue;
            }
            let score = if option == wanted {
                100
            } else if option.contains(&wanted) || wanted.contains(&option) {
                let ratio = option.len().min(wanted.len()) as f64 / option.len().max(wanted.len()) as f64;
                if ratio >= 0.5 {
                    80
                } else {
                    0
                }
            } else {
                0
            };
            if score > 0 && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((member, score));
            }
        }

        let Some((member, score)) = best else {
            return Err(FieldError::dropdown(
                &field.label,
                format!("no radio option matches '{}'", value),
            ));
        };
        debug!(target: "jobflow::interact", label = %field.label, option = %member.option_label, score, "radio group match");

        let element = self.fresh_element(member).await?;
        self.click_radio(&element, &field.label).await?;
        if element.is_checked().await? {
            Ok(FillOutcome::ok("radio_group", &member.option_label))
        } else {
            Err(FieldError::verification(&field.label, "checked", "unchecked"))
        }
    }

    /// Value may be a list (comma string). Each named option's checkbox is
    /// checked; a single-member group also accepts boolean strings.
    async fn fill_checkbox_group(&self, field: &FormField, value: &str) -> FormResult<FillOutcome> {
        let members = &field.individual_checkboxes;
        if members.is_empty() {
            return Err(FieldError::new(
                FieldErrorKind::Other,
                &field.label,
                "no individual checkboxes in group",
            ));
        }

        if members.len() == 1 && (truthy(value) || matches!(value.trim().to_lowercase().as_str(), "false" | "no" | "off")) {
            let element = self.fresh_element(&members[0]).await?;
            element.set_checked(truthy(value)).await?;
            return Ok(FillOutcome::ok("checkbox_group", value));
        }

        let wanted = split_values(value);
        let mut checked = Vec::new();
        for want in &wanted {
            let want_lower = want.to_lowercase();
            for member in members {
                let option = if member.option_label.is_empty() {
                    if member.name.is_empty() { member.label.clone() } else { member.name.clone() }
                } else {
                    member.option_label.clone()
                };
                let option_lower = option.to_lowercase();
                if option_lower == want_lower
                    || option_lower.contains(&want_lower)
                    || want_lower.contains(&option_lower)
                {
                    let element = self.fresh_element(member).await?;
                    element.set_checked(true).await?;
                    checked.push(option);
                    break;
                }
            }
        }

        if checked.is_empty() {
            Err(FieldError::dropdown(
                &field.label,
                format!("no checkbox options match '{}'", value),
            ))
        } else {
            Ok(FillOutcome::ok("checkbox_group", checked.join(", ")))
        }
    }

    /// Vendor dropdowns run under an 8-second deadline; a timeout surfaces
    /// as a typed error so the orchestrator escalates to the model.
    async fn fill_dropdown(
        &self,
        element: &ElementRef,
        value: &str,
        label: &str,
        category: FieldCategory,
    ) -> FormResult<FillOutcome> {
        match tokio::time::timeout(DROPDOWN_DEADLINE, widgets::fill_dropdown(self.page, element, value, label)).await
        {
            Ok(Ok(true)) => Ok(FillOutcome::ok("fast_fuzzy_match", value)),
            Ok(Ok(false)) => Err(FieldError::dropdown(
                label,
                format!("{}: no matching option for '{}'", category.as_str(), value),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FieldError::timeout(
                label,
                format!("dropdown fill exceeded {}s", DROPDOWN_DEADLINE.as_secs()),
            )),
        }
    }

    async fn fill_greenhouse_multi(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        let values = split_values(value);
        if values.is_empty() {
            return Err(FieldError::dropdown(label, "no values provided for multi-select"));
        }
        let mut selected = Vec::new();
        let last = values.len() - 1;
        for (i, v) in values.iter().enumerate() {
            match widgets::fill_greenhouse_multiselect(self.page, element, v, label, i == last).await {
                Ok(true) => selected.push(v.clone()),
                Ok(false) => debug!(target: "jobflow::interact", label, value = %v, "multi-select option not found"),
                Err(e) => debug!(target: "jobflow::interact", label, value = %v, error = %e, "multi-select option errored"),
            }
        }
        if selected.is_empty() {
            Err(FieldError::dropdown(label, format!("could not select any of {:?}", values)))
        } else {
            Ok(FillOutcome::ok("greenhouse_multiselect", selected.join(", ")))
        }
    }

    /// Workday multiselect: open once, then search-and-click per value, and
    /// close with Escape.
    async fn fill_workday_multiselect(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        let values = split_values(value);
        element.click().await?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut selected = Vec::new();
        for v in values.iter().take(10) {
            let search = self
                .page
                .query("input[type=\"text\"][role=\"combobox\"]")
                .await?;
            if let Some(search) = search {
                let _ = search.fill(v).await;
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            let mut clicked = false;
            for option in self.page.query_all("[role=\"option\"]").await? {
                if !option.is_visible().await.unwrap_or(false) {
                    continue;
                }
                let text = option.text().await?;
                if text.to_lowercase().contains(&v.to_lowercase()) {
                    if option.click().await.is_ok() {
                        selected.push(v.clone());
                        clicked = true;
                    }
                    break;
                }
            }
            if !clicked {
                debug!(target: "jobflow::interact", label, value = %v, "workday option not found");
            }
        }
        let _ = element.press_key("Escape").await;

        if selected.is_empty() {
            Err(FieldError::dropdown(label, format!("could not select any of {:?}", values)))
        } else {
            Ok(FillOutcome::ok("workday_multiselect", selected.join(", ")))
        }
    }

    async fn fill_ashby(&self, element: &ElementRef, value: &str, label: &str) -> FormResult<FillOutcome> {
        if widgets::fill_ashby(element, value).await? {
            Ok(FillOutcome::ok("ashby_button_group", value))
        } else {
            Err(FieldError::dropdown(label, format!("no button matches '{}'", value)))
        }
    }

    async fn fill_file_upload(
        &self,
        element: &ElementRef,
        value: &str,
        label: &str,
        profile: &Profile,
    ) -> FormResult<FillOutcome> {
        let path = PathBuf::from(value);
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir().map_err(|e| FieldError::other(e.to_string()))?.join(path)
        };
        if !path.exists() {
            return Err(FieldError::new(
                FieldErrorKind::Other,
                label,
                format!("file not found: {}", path.display()),
            ));
        }

        let file_type = if label.to_lowercase().contains("cover") {
            "CoverLetter"
        } else {
            "Resume"
        };
        let clean = create_clean_filename(&path, profile, file_type)
            .map_err(|e| FieldError::new(FieldErrorKind::Other, label, e.to_string()))?;

        element.set_input_files(&[clean.clone()]).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let file_name = clean
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.page.content().await {
            Ok(content) if content.contains(&file_name) => Ok(FillOutcome::ok("file_upload", file_name)),
            _ => {
                warn!(target: "jobflow::interact", label, file = %file_name, "file name not confirmed on page");
                Ok(FillOutcome::ok("file_upload", file_name))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resume upload helper
// ---------------------------------------------------------------------------

static UPLOAD_TEXT: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
    regex::Regex::new(r"(?i)select file|upload|attach|resume|cv|choose file|browse").unwrap()
});

/// Instructions returned by the model-guided upload fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInstructions {
    pub method: String,
    pub selector: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Tries to attach the resume anywhere the page accepts one. Ladder:
/// Workday-specific automation ids, any visible file input, an upload-ish
/// button paired with a file input, and finally a model-guided pick over a
/// digest of upload-looking DOM nodes.
pub async fn upload_resume_if_present(
    page: &dyn Page,
    resume_path: &Path,
    profile: &Profile,
    model: Option<&dyn TextModel>,
) -> FormResult<bool> {
    if !resume_path.exists() {
        return Ok(false);
    }
    let clean = create_clean_filename(resume_path, profile, "Resume")
        .map_err(|e| FieldError::other(e.to_string()))?;

    // Already uploaded this session?
    if let Ok(content) = page.content().await {
        if let Some(name) = clean.file_name() {
            if content.contains(&*name.to_string_lossy()) {
                return Ok(true);
            }
        }
    }

    // Workday automation ids first; they hide the real input.
    for selector in [
        "input[data-automation-id=\"file-upload-input-ref\"]",
        "input[data-automation-id*=\"file-upload\"]",
    ] {
        if let Some(input) = page.query(selector).await? {
            if input.set_input_files(&[clean.clone()]).await.is_ok() {
                info!(target: "jobflow::interact", selector, "resume uploaded via automation id");
                return Ok(true);
            }
        }
    }

    // Any file input at all (visible or not; many are styled away).
    for input in page.query_all("input[type=\"file\"]").await? {
        if input.set_input_files(&[clean.clone()]).await.is_ok() {
            info!(target: "jobflow::interact", "resume uploaded via file input");
            return Ok(true);
        }
    }

    // An upload-looking clickable that reveals a file input.
    for clickable in page.query_all("button, a[role=\"button\"], div[role=\"button\"], label").await? {
        if !clickable.is_visible().await.unwrap_or(false) {
            continue;
        }
        let text = clickable.text().await?;
        if !UPLOAD_TEXT.is_match(&text) {
            continue;
        }
        let _ = clickable.click().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        for input in page.query_all("input[type=\"file\"]").await? {
            if input.set_input_files(&[clean.clone()]).await.is_ok() {
                info!(target: "jobflow::interact", trigger = %text, "resume uploaded via upload control");
                return Ok(true);
            }
        }
    }

    // Model-guided fallback over an upload-element digest of the page.
    let Some(model) = model else {
        return Ok(false);
    };
    let digest = upload_dom_digest(page).await?;
    if digest.is_empty() {
        return Ok(false);
    }
    let prompt = format!(
        "A job application page needs a resume uploaded but no standard upload control worked.\n\
         Candidate elements (CSS selector followed by outer HTML):\n{}\n\n\
         Reply with JSON {{\"method\": \"set_files\"|\"click\", \"selector\": \"<css>\", \"reason\": \"...\", \"confidence\": 0.0-1.0}}.",
        digest
    );
    let value = model.generate_json(&prompt).await.map_err(FieldError::from)?;
    let instructions: UploadInstructions =
        serde_json::from_value(value).map_err(|e| FieldError::other(format!("upload instructions: {}", e)))?;
    if instructions.confidence < 0.3 {
        return Ok(false);
    }
    let Some(target) = page.query(&instructions.selector).await? else {
        return Ok(false);
    };
    match instructions.method.as_str() {
        "set_files" => Ok(target.set_input_files(&[clean]).await.is_ok()),
        "click" => {
            let _ = target.click().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            for input in page.query_all("input[type=\"file\"]").await? {
                if input.set_input_files(&[clean.clone()]).await.is_ok() {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// Extracts upload-looking elements from the page HTML for the model.
async fn upload_dom_digest(page: &dyn Page) -> FormResult<String> {
    let html = page.content().await?;
    let document = scraper::Html::parse_document(&html);
    let mut lines = Vec::new();
    for selector_text in ["input[type=file]", "button", "label", "a", "div[role=button]"] {
        let Ok(selector) = scraper::Selector::parse(selector_text) else {
            continue;
        };
        for element in document.select(&selector).take(20) {
            let text = element.text().collect::<Vec<_>>().join(" ");
            let html_snippet = element.html();
            if selector_text != "input[type=file]" && !UPLOAD_TEXT.is_match(&text) {
                continue;
            }
            let descriptor = element
                .value()
                .attr("id")
                .map(|id| format!("#{}", id))
                .or_else(|| element.value().attr("name").map(|n| format!("[name=\"{}\"]", n)))
                .unwrap_or_else(|| selector_text.to_string());
            lines.push(format!("{} :: {}", descriptor, html_snippet.chars().take(200).collect::<String>()));
        }
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::detect_fields;
    use crate::page::fake::FakePage;
    use crate::questions::consolidate_radio_groups;
    use serde_json::json;

    fn profile() -> Profile {
        Profile::from_json(json!({ "first_name": "Asha", "last_name": "Rao" })).unwrap()
    }

    #[tokio::test]
    async fn text_fill_verifies_readback() {
        let page = FakePage::from_html(r#"<input type="text" id="city" aria-label="City">"#);
        let fields = detect_fields(&page, false).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor.fill_field(&fields[0], "Boston", &profile()).await;
        assert!(outcome.success);
        assert_eq!(outcome.method, "text_fill");
        assert_eq!(page.value_of("city").unwrap(), "Boston");
    }

    #[tokio::test]
    async fn prefilled_fields_skip_and_report_the_intended_value() {
        let page = FakePage::from_html(r#"<input type="text" id="email" value="old@example.com" aria-label="Email">"#);
        let fields = detect_fields(&page, false).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor.fill_field(&fields[0], "new@example.com", &profile()).await;
        assert!(outcome.success);
        assert_eq!(outcome.method, "skipped_already_filled");
        // Intended value, never the DOM value.
        assert_eq!(outcome.final_value.as_deref(), Some("new@example.com"));
        assert_eq!(page.value_of("email").unwrap(), "old@example.com");
    }

    #[tokio::test]
    async fn radio_group_picks_best_matching_member() {
        let page = FakePage::from_html(
            r#"
            <fieldset>
              <legend>When do you expect to graduate?</legend>
              <label><input type="radio" name="grad" id="g1" value="may25">May 2025</label>
              <label><input type="radio" name="grad" id="g2" value="dec25">December 2025</label>
              <label><input type="radio" name="grad" id="g3" value="none">I am not currently enrolled</label>
            </fieldset>
        "#,
        );
        let fields = detect_fields(&page, false).await.unwrap();
        let fields = consolidate_radio_groups(&page, fields).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor.fill_field(&fields[0], "May 2025", &profile()).await;
        assert!(outcome.success);
        assert!(page.checked_of("g1").unwrap());
        assert!(!page.checked_of("g3").unwrap());
    }

    #[tokio::test]
    async fn checkbox_toggles_by_truthiness() {
        let page = FakePage::from_html(r#"<label><input type="checkbox" id="terms">I agree to the terms</label>"#);
        let fields = detect_fields(&page, false).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor.fill_field(&fields[0], "true", &profile()).await;
        assert!(outcome.success);
        assert_eq!(outcome.method, "check");
        assert!(page.checked_of("terms").unwrap());
    }

    #[tokio::test]
    async fn empty_dropdown_is_a_typed_dropdown_error() {
        // A menu that renders only its "No options" notice: nothing to
        // click, Enter commits nothing, the driver reports no match.
        let page = FakePage::from_html(
            r#"
            <input role="combobox" aria-haspopup="true" id="dept" aria-label="Department">
            <div data-fake-menu-for="dept" class="select__menu">
              <div class="select__menu-notice">No options</div>
            </div>
        "#,
        );
        let fields = detect_fields(&page, false).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor.fill_field(&fields[0], "Engineering", &profile()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(FieldErrorKind::DropdownInteraction));
    }

    #[tokio::test]
    async fn file_upload_renames_and_verifies_on_page() {
        let dir = tempfile::tempdir().unwrap();
        let resume = dir.path().join("my resume.pdf");
        std::fs::write(&resume, b"pdf").unwrap();

        let page = FakePage::from_html(r#"<input type="file" id="resume" aria-label="Resume">"#);
        let fields = detect_fields(&page, false).await.unwrap();
        let interactor = FieldInteractor::new(&page);
        let outcome = interactor
            .fill_field(&fields[0], resume.to_str().unwrap(), &profile())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.final_value.as_deref(), Some("Asha_Rao_Resume.pdf"));
        assert!(dir.path().join("Asha_Rao_Resume.pdf").exists());
    }

    #[tokio::test]
    async fn resume_upload_ladder_finds_plain_file_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let resume = dir.path().join("resume.pdf");
        std::fs::write(&resume, b"pdf").unwrap();

        let page = FakePage::from_html(r#"<div><input type="file" id="candidate-file"></div>"#);
        let uploaded = upload_resume_if_present(&page, &resume, &profile(), None).await.unwrap();
        assert!(uploaded);
        assert_eq!(page.value_of("candidate-file").unwrap(), "Asha_Rao_Resume.pdf");
    }
}
