//! Form-field model: categories, detection, stable identifiers, and the
//! per-page trackers that keep the fill loop from repeating itself.

use crate::error::FormResult;
use crate::page::{attr_or_empty, ElementRef, Page};
use dashmap::{DashMap, DashSet};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Normalized kind of a form control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    TextInput,
    Textarea,
    Checkbox,
    Radio,
    RadioGroup,
    CheckboxGroup,
    Dropdown,
    GreenhouseDropdown,
    GreenhouseDropdownMulti,
    WorkdayDropdown,
    WorkdayMultiselect,
    LeverDropdown,
    AshbyButtonGroup,
    FileUpload,
}

impl FieldCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldCategory::TextInput => "text_input",
            FieldCategory::Textarea => "textarea",
            FieldCategory::Checkbox => "checkbox",
            FieldCategory::Radio => "radio",
            FieldCategory::RadioGroup => "radio_group",
            FieldCategory::CheckboxGroup => "checkbox_group",
            FieldCategory::Dropdown => "dropdown",
            FieldCategory::GreenhouseDropdown => "greenhouse_dropdown",
            FieldCategory::GreenhouseDropdownMulti => "greenhouse_dropdown_multi",
            FieldCategory::WorkdayDropdown => "workday_dropdown",
            FieldCategory::WorkdayMultiselect => "workday_multiselect",
            FieldCategory::LeverDropdown => "lever_dropdown",
            FieldCategory::AshbyButtonGroup => "ashby_button_group",
            FieldCategory::FileUpload => "file_upload",
        }
    }

    /// Any single-choice dropdown flavor.
    pub fn is_dropdown(self) -> bool {
        matches!(
            self,
            FieldCategory::Dropdown
                | FieldCategory::GreenhouseDropdown
                | FieldCategory::WorkdayDropdown
                | FieldCategory::LeverDropdown
        )
    }

    /// Free-text inputs subject to the narrative/overflow value checks.
    pub fn is_text_like(self) -> bool {
        matches!(self, FieldCategory::TextInput | FieldCategory::Textarea)
    }
}

/// One selectable option of a group or dropdown.
#[derive(Clone)]
pub struct OptionItem {
    pub text: String,
    pub value: String,
    pub id: String,
    pub element: Option<ElementRef>,
}

impl std::fmt::Debug for OptionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionItem")
            .field("text", &self.text)
            .field("value", &self.value)
            .field("id", &self.id)
            .finish()
    }
}

/// A detected form field. Lives for one iteration of the fill loop; the
/// `stable_id` is deterministic so trackers carry across re-detections.
#[derive(Clone)]
pub struct FormField {
    pub element: ElementRef,
    pub category: FieldCategory,
    pub input_type: String,
    pub label: String,
    pub name: String,
    pub id: String,
    pub placeholder: String,
    pub aria_label: String,
    pub stable_id: String,
    pub tag_name: String,
    pub required: bool,
    pub is_filled: bool,
    pub options: Vec<OptionItem>,
    /// The question this control answers (groups and question-shaped fields).
    pub question: String,
    /// This specific option's label (radio/checkbox members).
    pub option_label: String,
    /// Members of a consolidated radio group.
    pub individual_radios: Vec<FormField>,
    /// Members of a consolidated checkbox group.
    pub individual_checkboxes: Vec<FormField>,
}

impl std::fmt::Debug for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormField")
            .field("label", &self.label)
            .field("category", &self.category)
            .field("stable_id", &self.stable_id)
            .finish()
    }
}

impl FormField {
    /// Identifier used by completion/attempt trackers.
    pub fn tracker_id(&self) -> String {
        if !self.stable_id.is_empty() {
            self.stable_id.clone()
        } else if !self.id.is_empty() {
            self.id.clone()
        } else if !self.name.is_empty() {
            self.name.clone()
        } else {
            format!("field_{}", stable_label_hash(&self.label))
        }
    }
}

fn stable_label_hash(label: &str) -> String {
    let digest = Md5::digest(label.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..8].to_string()
}

/// Deterministic field identifier: `{tag}_{id}`, `{tag}_{name}`, or
/// `{tag}_{md5(label)[:8]}`. Same (tag, id, name, label) always yields the
/// same id, regardless of DOM order.
pub fn stable_id(tag: &str, id: &str, name: &str, label: &str) -> String {
    if !id.is_empty() {
        format!("{}_{}", tag, id)
    } else if !name.is_empty() {
        format!("{}_{}", tag, name)
    } else {
        format!("{}_{}", tag, stable_label_hash(label))
    }
}

/// Resolves the visible label for a control:
/// `label[for=id]` -> `aria-labelledby` -> enclosing label -> aria-label /
/// placeholder / name.
async fn resolve_label(page: &dyn Page, element: &ElementRef) -> FormResult<String> {
    let id = attr_or_empty(element.as_ref(), "id").await;
    if !id.is_empty() {
        if let Some(label) = page.query(&format!("label[for=\"{}\"]", id)).await? {
            let text = label.text().await?.replace('*', "").trim().to_string();
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    if let Some(labelled_by) = element.attr("aria-labelledby").await? {
        if let Some(label_id) = labelled_by.split_whitespace().next() {
            if let Some(label) = page.query(&format!("[id=\"{}\"]", label_id)).await? {
                let text = label.text().await?.replace('*', "").trim().to_string();
                if !text.is_empty() {
                    return Ok(text);
                }
            }
        }
    }

    // Enclosing <label> (checkbox/radio markup) within two levels.
    let mut current = element.parent().await?;
    for _ in 0..2 {
        let Some(node) = current else { break };
        if node.tag_name().await? == "label" {
            let text = node.text().await?.replace('*', "").trim().to_string();
            if !text.is_empty() {
                return Ok(text);
            }
        }
        current = node.parent().await?;
    }

    let aria = attr_or_empty(element.as_ref(), "aria-label").await;
    if !aria.is_empty() {
        return Ok(aria);
    }
    let placeholder = attr_or_empty(element.as_ref(), "placeholder").await;
    if !placeholder.is_empty() {
        return Ok(placeholder);
    }
    Ok(attr_or_empty(element.as_ref(), "name").await)
}

/// True when any ancestor (up to 4 levels) marks a React-Select multi
/// container.
async fn is_multi_select(element: &ElementRef) -> FormResult<bool> {
    let mut current = element.parent().await?;
    for _ in 0..4 {
        let Some(node) = current else { break };
        let class = attr_or_empty(node.as_ref(), "class").await;
        if class.contains("is-multi") {
            return Ok(true);
        }
        current = node.parent().await?;
    }
    Ok(false)
}

async fn classify(element: &ElementRef, tag: &str, input_type: &str) -> FormResult<FieldCategory> {
    if tag == "select" {
        let class = attr_or_empty(element.as_ref(), "class").await;
        if class.contains("lever") || class.contains("application-field") {
            return Ok(FieldCategory::LeverDropdown);
        }
        return Ok(FieldCategory::Dropdown);
    }
    if tag == "textarea" {
        return Ok(FieldCategory::Textarea);
    }

    let role = attr_or_empty(element.as_ref(), "role").await;
    let haspopup = attr_or_empty(element.as_ref(), "aria-haspopup").await;
    let autocomplete = attr_or_empty(element.as_ref(), "aria-autocomplete").await;
    if role == "combobox" && (haspopup == "true" || autocomplete == "list") {
        return Ok(if is_multi_select(element).await? {
            FieldCategory::GreenhouseDropdownMulti
        } else {
            FieldCategory::GreenhouseDropdown
        });
    }

    let automation_id = attr_or_empty(element.as_ref(), "data-automation-id").await;
    if automation_id.contains("dropdown") {
        return Ok(FieldCategory::WorkdayDropdown);
    }

    Ok(match input_type {
        "checkbox" => FieldCategory::Checkbox,
        "radio" => FieldCategory::Radio,
        "file" => FieldCategory::FileUpload,
        _ => FieldCategory::TextInput,
    })
}

/// Detects every fillable control on the page. With `extract_options` false
/// (the fill loop's fast mode) dropdown options are left for the vendor
/// drivers to discover.
pub async fn detect_fields(page: &dyn Page, extract_options: bool) -> FormResult<Vec<FormField>> {
    let mut fields = Vec::new();
    let elements = page.query_all("input, select, textarea").await?;

    for element in elements {
        let tag = element.tag_name().await?;
        let input_type = if tag == "input" {
            element.attr("type").await?.unwrap_or_else(|| "text".into())
        } else {
            String::new()
        };
        if matches!(input_type.as_str(), "hidden" | "submit" | "button") {
            continue;
        }
        if !element.is_visible().await.unwrap_or(false) {
            continue;
        }

        let category = classify(&element, &tag, &input_type).await?;
        let name = attr_or_empty(element.as_ref(), "name").await;
        let id = attr_or_empty(element.as_ref(), "id").await;
        let placeholder = attr_or_empty(element.as_ref(), "placeholder").await;
        let aria_label = attr_or_empty(element.as_ref(), "aria-label").await;
        let label = resolve_label(page, &element).await?;
        let required = element.attr("required").await?.is_some()
            || attr_or_empty(element.as_ref(), "aria-required").await == "true";

        let is_filled = match category {
            FieldCategory::Checkbox | FieldCategory::Radio => element.is_checked().await.unwrap_or(false),
            _ => !element.input_value().await.unwrap_or_default().trim().is_empty(),
        };

        let mut options = Vec::new();
        if extract_options && category == FieldCategory::Dropdown {
            for option in element.query_all("option").await? {
                let text = option.text().await?;
                if text.trim().is_empty() {
                    continue;
                }
                options.push(OptionItem {
                    text: text.trim().to_string(),
                    value: attr_or_empty(option.as_ref(), "value").await,
                    id: attr_or_empty(option.as_ref(), "id").await,
                    element: Some(option),
                });
            }
        }

        let label = if label.is_empty() {
            format!("Field {}", fields.len() + 1)
        } else {
            label
        };
        let stable = stable_id(&tag, &id, &name, &label);

        fields.push(FormField {
            element,
            category,
            input_type,
            label,
            name,
            id,
            placeholder,
            aria_label,
            stable_id: stable,
            tag_name: tag,
            required,
            is_filled,
            options,
            question: String::new(),
            option_label: String::new(),
            individual_radios: Vec::new(),
            individual_checkboxes: Vec::new(),
        });
    }

    Ok(fields)
}

// ---------------------------------------------------------------------------
// Per-page trackers
// ---------------------------------------------------------------------------

/// Fill strategies, tried strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMethod {
    Deterministic,
    LearnedPattern,
    Ai,
}

impl FillMethod {
    pub const ORDER: [FillMethod; 3] = [FillMethod::Deterministic, FillMethod::LearnedPattern, FillMethod::Ai];
}

/// Fields already filled this session. Keyed by stable id so re-detection
/// never refills a static field.
#[derive(Default)]
pub struct FieldCompletion {
    current_page: std::sync::Mutex<String>,
    completed: DashMap<String, String>,
}

impl FieldCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switching pages clears per-page completion state.
    pub fn set_current_page(&self, url: &str) {
        let mut current = self.current_page.lock().unwrap();
        if *current != url {
            *current = url.to_string();
            self.completed.clear();
        }
    }

    pub fn mark_completed(&self, field_id: &str, value: &str) {
        self.completed.insert(field_id.to_string(), value.to_string());
    }

    pub fn is_completed(&self, field_id: &str) -> bool {
        self.completed.contains_key(field_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

/// Which strategies each field has consumed, plus the terminal
/// needs-human set.
#[derive(Default)]
pub struct AttemptTracker {
    attempts: DashMap<String, HashSet<FillMethod>>,
    needs_human: DashSet<String>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_attempted(&self, field_id: &str, method: FillMethod) {
        self.attempts.entry(field_id.to_string()).or_default().insert(method);
    }

    pub fn has_attempted(&self, field_id: &str, method: FillMethod) -> bool {
        self.attempts
            .get(field_id)
            .map(|set| set.contains(&method))
            .unwrap_or(false)
    }

    /// Marks the field as needing human input; no strategy will retry it.
    pub fn mark_needs_human(&self, field_id: &str) {
        self.needs_human.insert(field_id.to_string());
    }

    pub fn requires_human_input(&self, field_id: &str) -> bool {
        self.needs_human.contains(field_id)
    }

    /// Next untried strategy, or `None` when exhausted (or human-gated).
    pub fn next_method(&self, field_id: &str) -> Option<FillMethod> {
        if self.requires_human_input(field_id) {
            return None;
        }
        FillMethod::ORDER
            .into_iter()
            .find(|m| !self.has_attempted(field_id, *m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fake::FakePage;

    #[test]
    fn stable_ids_prefer_id_then_name_then_label_hash() {
        assert_eq!(stable_id("input", "first", "fn", "First"), "input_first");
        assert_eq!(stable_id("input", "", "fn", "First"), "input_fn");
        let hashed = stable_id("input", "", "", "First Name");
        assert!(hashed.starts_with("input_"));
        assert_eq!(hashed.len(), "input_".len() + 8);
        // Same label, same id.
        assert_eq!(hashed, stable_id("input", "", "", "First Name"));
    }

    #[tokio::test]
    async fn detection_is_stable_across_dom_order_noise() {
        let a = FakePage::from_html(
            r#"<div><label for="email">Email</label><input id="email" type="text">
               <input name="phone" type="text" aria-label="Phone"></div>"#,
        );
        let b = FakePage::from_html(
            r#"<div><input name="phone" type="text" aria-label="Phone"><span>noise</span>
               <label for="email">Email</label><input id="email" type="text"></div>"#,
        );
        let mut ids_a: Vec<String> = detect_fields(&a, false).await.unwrap().iter().map(|f| f.stable_id.clone()).collect();
        let mut ids_b: Vec<String> = detect_fields(&b, false).await.unwrap().iter().map(|f| f.stable_id.clone()).collect();
        ids_a.sort();
        ids_b.sort();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn detection_classifies_and_labels() {
        let page = FakePage::from_html(
            r#"
            <form>
              <label for="first_name">First Name *</label>
              <input id="first_name" type="text" required>
              <input type="hidden" name="csrf">
              <textarea id="essay" aria-label="Why us?"></textarea>
              <select id="color" class="application-field"><option>Red</option></select>
              <input role="combobox" aria-haspopup="true" id="school">
              <input type="file" id="resume" name="resume">
              <input type="checkbox" id="terms" name="terms">
            </form>
        "#,
        );
        let fields = detect_fields(&page, false).await.unwrap();
        let by_id = |id: &str| fields.iter().find(|f| f.id == id).unwrap();

        assert_eq!(fields.len(), 6);
        assert_eq!(by_id("first_name").label, "First Name");
        assert!(by_id("first_name").required);
        assert_eq!(by_id("essay").category, FieldCategory::Textarea);
        assert_eq!(by_id("color").category, FieldCategory::LeverDropdown);
        assert_eq!(by_id("school").category, FieldCategory::GreenhouseDropdown);
        assert_eq!(by_id("resume").category, FieldCategory::FileUpload);
        assert_eq!(by_id("terms").category, FieldCategory::Checkbox);
    }

    #[test]
    fn attempt_tracker_walks_the_strategy_ladder() {
        let tracker = AttemptTracker::new();
        assert_eq!(tracker.next_method("f"), Some(FillMethod::Deterministic));
        tracker.mark_attempted("f", FillMethod::Deterministic);
        assert_eq!(tracker.next_method("f"), Some(FillMethod::LearnedPattern));
        tracker.mark_attempted("f", FillMethod::LearnedPattern);
        tracker.mark_attempted("f", FillMethod::Ai);
        assert_eq!(tracker.next_method("f"), None);

        tracker.mark_needs_human("g");
        assert_eq!(tracker.next_method("g"), None);
    }

    #[test]
    fn completion_resets_per_page() {
        let completion = FieldCompletion::new();
        completion.set_current_page("https://a.example/1");
        completion.mark_completed("x", "v");
        assert!(completion.is_completed("x"));
        completion.set_current_page("https://a.example/2");
        assert!(!completion.is_completed("x"));
    }
}
