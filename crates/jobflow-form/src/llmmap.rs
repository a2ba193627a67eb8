//! Model-backed field mapping: one batched call classifies every unmapped
//! field, a follow-up call writes essay answers for MANUAL fields, and a
//! final-review pass approves or corrects the filled page. All contracts
//! with the model are structured (line grammar for the batch, strict JSON
//! for review and corrections); nothing parses prose.

use crate::error::{FieldError, FormResult};
use crate::field::FormField;
use jobflow_core::gemini::TextModel;
use jobflow_core::profile::Profile;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Maximum options included per field in the catalog.
const MAX_OPTIONS_IN_CATALOG: usize = 15;

/// Generated-text caps by target control.
pub const MANUAL_MAX_TEXTAREA: usize = 1000;
pub const MANUAL_MAX_TEXT_INPUT: usize = 300;

/// What the model decided for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMappingKind {
    /// Direct profile data; fill as-is.
    Simple,
    /// Exact option text for a radio/select control.
    Dropdown,
    /// Comma list for a checkbox group or multi-select.
    Multiselect,
    /// Comma list derived from the profile's skill arrays.
    MultiselectSkills,
    /// Needs generated text (essays, cover letters).
    Manual,
    /// Unanswerable from the profile; flag and never retry.
    NeedsHumanInput,
}

/// One mapping from the batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiMapping {
    pub kind: AiMappingKind,
    pub value: String,
    /// Profile key backing the value, when the model names one; feeds the
    /// learned-pattern store.
    pub profile_field: Option<String>,
}

/// Outcome of the final review pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// One correction from the corrective pass. An empty `corrected_value`
/// clears the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub field_name: String,
    #[serde(default)]
    pub current_value: String,
    #[serde(default)]
    pub corrected_value: String,
    #[serde(default)]
    pub reason: String,
}

static RESPONSE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ID:\s*(.+?)\s*->\s*([A-Z_]+):\s*(.*)$").unwrap());
static FIELD_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\|\s*FIELD:\s*([a-z_0-9]+)\s*$").unwrap());

/// Batched field mapper over any [`TextModel`].
pub struct LlmFieldMapper<'a> {
    model: &'a dyn TextModel,
}

impl<'a> LlmFieldMapper<'a> {
    pub fn new(model: &'a dyn TextModel) -> Self {
        Self { model }
    }

    fn catalog_entry(field: &FormField) -> String {
        let mut entry = format!(
            "ID: {}\n  label: {}\n  category: {}\n  required: {}",
            field.tracker_id(),
            field.label,
            field.category.as_str(),
            field.required
        );
        if !field.placeholder.is_empty() {
            entry.push_str(&format!("\n  placeholder: {}", field.placeholder));
        }
        if !field.question.is_empty() && field.question != field.label {
            entry.push_str(&format!("\n  question: {}", field.question));
        }
        if !field.options.is_empty() {
            let options: Vec<&str> = field
                .options
                .iter()
                .take(MAX_OPTIONS_IN_CATALOG)
                .map(|o| o.text.as_str())
                .collect();
            entry.push_str(&format!("\n  options: {}", options.join(" | ")));
        }
        entry
    }

    fn batch_prompt(fields: &[FormField], profile: &Profile) -> String {
        let catalog: Vec<String> = fields.iter().map(Self::catalog_entry).collect();
        format!(
            "You are filling a job application form from the applicant's profile.\n\n\
             {profile}\n\
             FORM FIELDS:\n{catalog}\n\n\
             For EVERY field id above, answer exactly one line:\n\
             ID: <field_id> -> SIMPLE: <value>            (direct data; checkboxes take true/false)\n\
             ID: <field_id> -> DROPDOWN: <option text>    (radios and selects; MUST be the exact text of one listed option)\n\
             ID: <field_id> -> MULTISELECT: <comma list>  (checkbox groups; each item an exact option text)\n\
             ID: <field_id> -> MULTISELECT_SKILLS: <comma list>  (skill pickers; derive from the profile skill lists)\n\
             ID: <field_id> -> MANUAL: <short description>       (essays and cover letters needing written text)\n\
             ID: <field_id> -> NEEDS_HUMAN_INPUT: <reason>       (profile genuinely lacks the answer)\n\n\
             A line may end with ' | FIELD: <profile_key>' naming the profile key the value came from.\n\n\
             Rules:\n\
             - Be confidence-based: when the profile holds a value, use it; never answer 'Prefer not to say' when data exists.\n\
             - Infer race/ethnicity and Hispanic-or-not from nationality when race_ethnicity is absent.\n\
             - Work-authorization questions use require_sponsorship and visa_status from the profile.\n\
             - Graduation/enrollment questions: compare education end dates with today's date; a future end date means currently enrolled.\n\
             - Terms/consent checkboxes are SIMPLE: true even when their element id looks odd.\n\
             - Salary, notice period, and start-date preferences missing from the profile are NEEDS_HUMAN_INPUT.",
            profile = profile.render_for_llm(),
            catalog = catalog.join("\n"),
        )
    }

    /// Parses the line grammar, dropping ids that were never asked about.
    fn parse_response(text: &str, valid_ids: &HashMap<String, ()>) -> HashMap<String, AiMapping> {
        let mut mappings = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            let Some(captures) = RESPONSE_LINE.captures(line) else {
                continue;
            };
            let field_id = captures[1].trim().to_string();
            if !valid_ids.contains_key(&field_id) {
                debug!(target: "jobflow::llmmap", field_id = %field_id, "response for unknown field id");
                continue;
            }
            let kind = match &captures[2] {
                "SIMPLE" => AiMappingKind::Simple,
                "DROPDOWN" => AiMappingKind::Dropdown,
                "MULTISELECT" => AiMappingKind::Multiselect,
                "MULTISELECT_SKILLS" => AiMappingKind::MultiselectSkills,
                "MANUAL" => AiMappingKind::Manual,
                "NEEDS_HUMAN_INPUT" => AiMappingKind::NeedsHumanInput,
                other => {
                    warn!(target: "jobflow::llmmap", action = other, "unknown action type");
                    continue;
                }
            };
            let raw_value = captures[3].trim().to_string();
            let mut value = raw_value.clone();
            let mut profile_field = None;
            if let Some(suffix) = FIELD_SUFFIX.captures(&raw_value) {
                profile_field = Some(suffix[1].to_string());
                value = FIELD_SUFFIX.replace(&raw_value, "").trim().to_string();
            }
            mappings.insert(
                field_id,
                AiMapping {
                    kind,
                    value,
                    profile_field,
                },
            );
        }
        mappings
    }

    /// One batched call classifying every field. Returns mappings keyed by
    /// tracker id; absent ids mean the model declined to answer.
    pub async fn map_fields(
        &self,
        fields: &[FormField],
        profile: &Profile,
    ) -> FormResult<HashMap<String, AiMapping>> {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let prompt = Self::batch_prompt(fields, profile);
        let response = self.model.generate(&prompt).await.map_err(FieldError::from)?;
        let valid: HashMap<String, ()> = fields.iter().map(|f| (f.tracker_id(), ())).collect();
        let mappings = Self::parse_response(&response, &valid);
        info!(
            target: "jobflow::llmmap",
            asked = fields.len(),
            mapped = mappings.len(),
            "batch field mapping complete"
        );
        Ok(mappings)
    }

    /// Writes the text for a MANUAL field, capped by the target control.
    pub async fn generate_text_response(
        &self,
        field_label: &str,
        is_textarea: bool,
        profile: &Profile,
        description: &str,
    ) -> FormResult<String> {
        let max_length = if is_textarea { MANUAL_MAX_TEXTAREA } else { MANUAL_MAX_TEXT_INPUT };
        let prompt = format!(
            "{profile}\n\
             Write the applicant's answer to the application question below.\n\
             Question: {label}\n\
             Context: {description}\n\
             Requirements: first person, specific to the profile above, no placeholders, at most {max} characters.",
            profile = profile.render_for_llm(),
            label = field_label,
            description = description,
            max = max_length,
        );
        let text = self.model.generate(&prompt).await.map_err(FieldError::from)?;
        let mut text = text.trim().to_string();
        if text.len() > max_length {
            text.truncate(max_length);
            // Do not cut mid-word.
            if let Some(boundary) = text.rfind(' ') {
                text.truncate(boundary);
            }
        }
        Ok(text)
    }

    /// Final review of the filled page. Model failures default to approved
    /// with low confidence; review must never block an otherwise-finished
    /// application.
    pub async fn final_review(&self, filled: &[(String, String)], profile: &Profile) -> ReviewResult {
        let listing: Vec<String> = filled.iter().map(|(label, value)| format!("- {}: {}", label, value)).collect();
        let prompt = format!(
            "Review a filled job application form.\n\n{profile}\n\
             Filled fields:\n{listing}\n\n\
             Check that values match the profile, dropdown selections make sense, and nothing is inconsistent.\n\
             Respond with JSON only: {{\"approved\": true|false, \"issues\": [\"...\"], \"confidence\": 0.0-1.0}}.\n\
             Set approved=true with an empty issues list when everything looks right.",
            profile = profile.render_for_llm(),
            listing = listing.join("\n"),
        );
        match self.model.generate_json(&prompt).await {
            Ok(value) => match serde_json::from_value::<ReviewResult>(value) {
                Ok(review) => review,
                Err(e) => {
                    warn!(target: "jobflow::llmmap", error = %e, "review response malformed; approving");
                    ReviewResult {
                        approved: true,
                        issues: Vec::new(),
                        confidence: 0.5,
                    }
                }
            },
            Err(e) => {
                warn!(target: "jobflow::llmmap", error = %e, "review call failed; approving");
                ReviewResult {
                    approved: true,
                    issues: Vec::new(),
                    confidence: 0.5,
                }
            }
        }
    }

    /// Asks for concrete corrections to the flagged issues.
    pub async fn request_corrections(
        &self,
        issues: &[String],
        filled: &[(String, String)],
        profile: &Profile,
    ) -> FormResult<Vec<Correction>> {
        let listing: Vec<String> = filled.iter().map(|(label, value)| format!("- {}: {}", label, value)).collect();
        let prompt = format!(
            "A review of this job application flagged problems.\n\n{profile}\n\
             Filled fields:\n{listing}\n\nIssues:\n- {issues}\n\n\
             Respond with a JSON array of corrections, one object per field to change:\n\
             [{{\"field_name\": \"<label>\", \"current_value\": \"...\", \"corrected_value\": \"...\", \"reason\": \"...\"}}]\n\
             Use an empty corrected_value to clear a field. Only include fields that must change.",
            profile = profile.render_for_llm(),
            listing = listing.join("\n"),
            issues = issues.join("\n- "),
        );
        let value = self.model.generate_json(&prompt).await.map_err(FieldError::from)?;
        serde_json::from_value(value).map_err(|e| FieldError::other(format!("corrections response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobflow_core::error::Result as CoreResult;

    struct ScriptedModel {
        response: String,
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn generate(&self, _prompt: &str) -> CoreResult<String> {
            Ok(self.response.clone())
        }
    }

    fn valid(ids: &[&str]) -> HashMap<String, ()> {
        ids.iter().map(|i| (i.to_string(), ())).collect()
    }

    #[test]
    fn response_lines_parse_into_typed_mappings() {
        let text = "\
            ID: input_first_name -> SIMPLE: Asha | FIELD: first_name\n\
            ID: radio_group:grad -> DROPDOWN: May 2025\n\
            ID: checkbox_group:race -> MULTISELECT: Asian, White\n\
            ID: input_skills -> MULTISELECT_SKILLS: Rust, Python\n\
            ID: textarea_essay -> MANUAL: motivation essay\n\
            ID: input_salary -> NEEDS_HUMAN_INPUT: salary not in profile\n\
            garbage line\n\
            ID: input_unknown -> SIMPLE: dropped";
        let mappings = LlmFieldMapper::parse_response(
            text,
            &valid(&[
                "input_first_name",
                "radio_group:grad",
                "checkbox_group:race",
                "input_skills",
                "textarea_essay",
                "input_salary",
            ]),
        );
        assert_eq!(mappings.len(), 6);
        let first = &mappings["input_first_name"];
        assert_eq!(first.kind, AiMappingKind::Simple);
        assert_eq!(first.value, "Asha");
        assert_eq!(first.profile_field.as_deref(), Some("first_name"));
        assert_eq!(mappings["radio_group:grad"].kind, AiMappingKind::Dropdown);
        assert_eq!(mappings["checkbox_group:race"].value, "Asian, White");
        assert_eq!(mappings["input_salary"].kind, AiMappingKind::NeedsHumanInput);
        assert!(!mappings.contains_key("input_unknown"));
    }

    #[tokio::test]
    async fn manual_generation_respects_the_length_cap() {
        let long = "word ".repeat(400);
        let model = ScriptedModel { response: long };
        let mapper = LlmFieldMapper::new(&model);
        let text = mapper
            .generate_text_response("Why ACME?", true, &Profile::new(), "essay")
            .await
            .unwrap();
        assert!(text.len() <= MANUAL_MAX_TEXTAREA);
        assert!(!text.ends_with(' '));

        let short = mapper
            .generate_text_response("Why ACME?", false, &Profile::new(), "essay")
            .await
            .unwrap();
        assert!(short.len() <= MANUAL_MAX_TEXT_INPUT);
    }

    #[tokio::test]
    async fn review_failures_default_to_approved() {
        let model = ScriptedModel {
            response: "not json at all".into(),
        };
        let mapper = LlmFieldMapper::new(&model);
        let review = mapper.final_review(&[("A".into(), "B".into())], &Profile::new()).await;
        assert!(review.approved);
        assert_eq!(review.confidence, 0.5);
    }

    #[tokio::test]
    async fn structured_review_parses() {
        let model = ScriptedModel {
            response: r#"{"approved": false, "issues": ["Email looks wrong"], "confidence": 0.9}"#.into(),
        };
        let mapper = LlmFieldMapper::new(&model);
        let review = mapper.final_review(&[], &Profile::new()).await;
        assert!(!review.approved);
        assert_eq!(review.issues, vec!["Email looks wrong".to_string()]);
    }
}
