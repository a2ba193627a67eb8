//! User profile model: the data the form filler maps onto application forms.
//!
//! A profile is a heterogeneous map: scalar strings (`first_name`), string
//! lists (`programming_languages`), and nested record lists
//! (`work_experience`, `education`, `projects`). Keys are accepted in both
//! snake (`first_name`) and space (`first name`) form; the snake form is
//! canonical. A profile is read-only during a single fill session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tagged profile value. `untagged` so profiles deserialize from plain JSON
/// exports: strings, arrays of strings, and arrays of objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProfileValue {
    Text(String),
    List(Vec<String>),
    Records(Vec<serde_json::Map<String, serde_json::Value>>),
}

impl ProfileValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ProfileValue::Text(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ProfileValue::List(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    /// Scalar rendering: text verbatim, lists comma-joined. Records have no
    /// scalar form.
    pub fn render(&self) -> Option<String> {
        match self {
            ProfileValue::Text(s) if !s.trim().is_empty() => Some(s.clone()),
            ProfileValue::List(v) if !v.is_empty() => Some(v.join(", ")),
            _ => None,
        }
    }
}

/// One entry of `work_experience`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkExperience {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub description: String,
}

/// One entry of `education`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Education {
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub field_of_study: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub graduation_date: String,
    #[serde(default)]
    pub gpa: String,
}

/// The profile map with alias-aware access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    values: BTreeMap<String, ProfileValue>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn set(&mut self, key: &str, value: ProfileValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        self.set(key, ProfileValue::Text(value.to_string()));
    }

    /// Looks up `key`, falling back to its space/snake alias.
    pub fn get(&self, key: &str) -> Option<&ProfileValue> {
        if let Some(v) = self.values.get(key) {
            return Some(v);
        }
        let alias = if key.contains('_') {
            key.replace('_', " ")
        } else {
            key.replace(' ', "_")
        };
        self.values.get(&alias)
    }

    /// Scalar value for `key`, if present and non-empty.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ProfileValue::as_text)
    }

    /// Scalar-or-list rendering for `key`.
    pub fn render(&self, key: &str) -> Option<String> {
        self.get(key).and_then(ProfileValue::render)
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(ProfileValue::as_list)
    }

    fn records<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(ProfileValue::Records(records)) = self.get(key) else {
            return Vec::new();
        };
        records
            .iter()
            .filter_map(|r| serde_json::from_value(serde_json::Value::Object(r.clone())).ok())
            .collect()
    }

    pub fn work_experience(&self) -> Vec<WorkExperience> {
        self.records("work_experience")
    }

    pub fn education(&self) -> Vec<Education> {
        self.records("education")
    }

    pub fn projects(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        match self.get("projects") {
            Some(ProfileValue::Records(r)) => r.clone(),
            _ => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Renders the profile into the structured text block the LLM field
    /// mapper consumes. Sections are stable so prompts cache well.
    pub fn render_for_llm(&self) -> String {
        let mut out = String::from("USER PROFILE\n");

        let section = |out: &mut String, title: &str, keys: &[&str], profile: &Profile| {
            let mut lines = Vec::new();
            for key in keys {
                if let Some(v) = profile.render(key) {
                    lines.push(format!("  {}: {}", key, v));
                }
            }
            if !lines.is_empty() {
                out.push_str(&format!("\n{}:\n{}\n", title, lines.join("\n")));
            }
        };

        section(
            &mut out,
            "Personal",
            &[
                "first_name",
                "last_name",
                "email",
                "phone",
                "address",
                "address_line_2",
                "city",
                "state",
                "state_code",
                "zip_code",
                "country",
                "country_code",
                "nationality",
                "date_of_birth",
                "preferred_language",
                "linkedin",
                "github",
                "other_links",
                "portfolio",
                "summary",
            ],
            self,
        );
        section(
            &mut out,
            "Demographics",
            &["gender", "race_ethnicity", "veteran_status", "disability_status"],
            self,
        );
        section(
            &mut out,
            "Work authorization",
            &["work_authorization", "visa_status", "require_sponsorship"],
            self,
        );
        section(
            &mut out,
            "Skills",
            &["programming_languages", "frameworks", "tools", "technical_skills"],
            self,
        );
        section(
            &mut out,
            "Additional",
            &[
                "cover_letter",
                "salary_expectation",
                "availability",
                "willing_to_relocate",
                "preferred_locations",
                "source",
                "referral_source",
                "years_experience",
                "current_title",
                "current_company",
            ],
            self,
        );

        let work = self.work_experience();
        if !work.is_empty() {
            out.push_str("\nWork experience:\n");
            for w in &work {
                out.push_str(&format!(
                    "  - {} at {} ({} to {}){}\n",
                    w.title,
                    w.company,
                    w.start_date,
                    if w.current { "present" } else { w.end_date.as_str() },
                    if w.description.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", w.description)
                    }
                ));
            }
        }

        let education = self.education();
        if !education.is_empty() {
            out.push_str("\nEducation:\n");
            for e in &education {
                out.push_str(&format!(
                    "  - {} in {} at {} (ends {}){}\n",
                    e.degree,
                    e.field_of_study,
                    e.institution,
                    if e.end_date.is_empty() {
                        e.graduation_date.as_str()
                    } else {
                        e.end_date.as_str()
                    },
                    if e.gpa.is_empty() {
                        String::new()
                    } else {
                        format!(", GPA {}", e.gpa)
                    }
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_resolve_both_directions() {
        let mut p = Profile::new();
        p.set_text("first name", "Asha");
        p.set_text("last_name", "Rao");
        assert_eq!(p.text("first_name"), Some("Asha"));
        assert_eq!(p.text("last name"), Some("Rao"));
    }

    #[test]
    fn nested_records_deserialize() {
        let p = Profile::from_json(json!({
            "first_name": "Asha",
            "programming_languages": ["Rust", "Python"],
            "education": [{
                "institution": "State University",
                "degree": "Master of Science",
                "end_date": "May 2025"
            }]
        }))
        .unwrap();
        assert_eq!(p.text("first_name"), Some("Asha"));
        assert_eq!(p.render("programming_languages").as_deref(), Some("Rust, Python"));
        let edu = p.education();
        assert_eq!(edu.len(), 1);
        assert_eq!(edu[0].end_date, "May 2025");
    }

    #[test]
    fn llm_rendering_contains_sections() {
        let p = Profile::from_json(json!({
            "first_name": "Asha",
            "visa_status": "F-1",
            "work_experience": [{"company": "ACME", "title": "Engineer"}]
        }))
        .unwrap();
        let text = p.render_for_llm();
        assert!(text.contains("first_name: Asha"));
        assert!(text.contains("Work authorization"));
        assert!(text.contains("ACME"));
    }
}
