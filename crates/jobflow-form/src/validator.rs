//! Field-value validation: cleans a candidate value before it ever reaches
//! a control. An empty return tells the caller the field needs human input.

use crate::field::FieldCategory;
use once_cell::sync::Lazy;
use regex::Regex;

/// Narrative openers that indicate prose leaked into a short answer field.
const NARRATIVE_PHRASES: [&str; 9] = [
    "as a",
    "i am",
    "during my time",
    "my experience",
    "i have",
    "i worked",
    "my role",
    "in my position",
    "my background",
];

/// Short text inputs overflow past this length.
const SIMPLE_FIELD_MAX_LEN: usize = 50;

static WORK_AUTH_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)work authorization|authorized to work").unwrap());

static US_STATES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "alabama", "alaska", "arizona", "arkansas", "california", "colorado", "connecticut", "delaware",
        "florida", "georgia", "hawaii", "idaho", "illinois", "indiana", "iowa", "kansas", "kentucky",
        "louisiana", "maine", "maryland", "massachusetts", "michigan", "minnesota", "mississippi", "missouri",
        "montana", "nebraska", "nevada", "new hampshire", "new jersey", "new mexico", "new york",
        "north carolina", "north dakota", "ohio", "oklahoma", "oregon", "pennsylvania", "rhode island",
        "south carolina", "south dakota", "tennessee", "texas", "utah", "vermont", "virginia", "washington",
        "west virginia", "wisconsin", "wyoming",
    ]
});

/// Cleans `value` for the given field. Returns the trimmed value, or an
/// empty string when the value must not be written:
/// - narrative prose in a plain text input,
/// - text-input values past the simple-field length cap,
/// - a US state name offered for a work-authorization question.
pub fn clean(value: &str, field_label: &str, category: FieldCategory) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if category == FieldCategory::TextInput {
        let lower = trimmed.to_lowercase();
        if NARRATIVE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            return String::new();
        }
        if trimmed.len() > SIMPLE_FIELD_MAX_LEN {
            return String::new();
        }
    }

    if WORK_AUTH_LABEL.is_match(field_label) {
        let lower = trimmed.to_lowercase();
        if US_STATES.iter().any(|state| lower.contains(state)) {
            return String::new();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_collapse_to_empty() {
        assert_eq!(clean("", "First Name", FieldCategory::TextInput), "");
        assert_eq!(clean("   ", "First Name", FieldCategory::TextInput), "");
    }

    #[test]
    fn narrative_prose_is_vetoed_for_text_inputs() {
        assert_eq!(
            clean("As a software engineer I built...", "Current Title", FieldCategory::TextInput),
            ""
        );
        assert_eq!(
            clean("I have five years of experience", "Years", FieldCategory::TextInput),
            ""
        );
        // Textareas accept prose.
        assert_eq!(
            clean("I have five years of experience", "Essay", FieldCategory::Textarea),
            "I have five years of experience"
        );
    }

    #[test]
    fn overflow_is_vetoed_for_text_inputs() {
        let long = "x".repeat(51);
        assert_eq!(clean(&long, "Nickname", FieldCategory::TextInput), "");
        let ok = "x".repeat(50);
        assert_eq!(clean(&ok, "Nickname", FieldCategory::TextInput), ok);
    }

    #[test]
    fn state_names_never_answer_work_authorization() {
        assert_eq!(
            clean("California", "Are you authorized to work in the US?", FieldCategory::Dropdown),
            ""
        );
        assert_eq!(
            clean("Yes", "Work Authorization", FieldCategory::Dropdown),
            "Yes"
        );
        // Same value is fine for an address field.
        assert_eq!(clean("California", "State", FieldCategory::TextInput), "California");
    }

    #[test]
    fn values_are_trimmed() {
        assert_eq!(clean("  Asha  ", "First Name", FieldCategory::TextInput), "Asha");
    }
}
