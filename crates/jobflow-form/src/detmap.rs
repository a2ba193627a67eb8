//! Deterministic field mapper: exact label lookup, regex patterns, and
//! semantic inference over question-shaped labels. Resolves the large
//! majority of fields instantly, leaving only the genuinely ambiguous ones
//! for the model.

use crate::field::FieldCategory;
use jobflow_core::profile::Profile;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a mapping was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMethod {
    Exact,
    Pattern,
    Semantic,
    Learned,
    Ai,
    TermsAutocheck,
    NeedsAi,
}

/// A resolved field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub profile_key: String,
    pub value: String,
    pub confidence: f64,
    pub method: MapMethod,
}

impl Mapping {
    fn new(profile_key: &str, value: impl Into<String>, confidence: f64, method: MapMethod) -> Self {
        Self {
            profile_key: profile_key.to_string(),
            value: value.into(),
            confidence,
            method,
        }
    }
}

/// Lowercases, collapses whitespace, and strips trailing `*` / `:`.
pub fn normalize_label(label: &str) -> String {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s = collapsed.to_lowercase();
    while s.ends_with('*') || s.ends_with(':') || s.ends_with(' ') {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// Tier 1: exact label variants
// ---------------------------------------------------------------------------

static EXACT_TABLE: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("first_name", vec!["first name", "fname", "given name", "first"]),
        ("last_name", vec!["last name", "lname", "surname", "family name", "last"]),
        ("full_name", vec!["full name", "name", "your name"]),
        ("email", vec!["email", "e-mail", "email address", "e-mail address"]),
        (
            "phone",
            vec!["phone", "telephone", "mobile", "phone number", "mobile number", "cell phone", "contact number"],
        ),
        ("address", vec!["address", "street address", "address line 1", "street", "address 1"]),
        ("address_line_2", vec!["address line 2", "apt", "apartment", "suite", "unit", "address 2"]),
        ("city", vec!["city", "town"]),
        ("state", vec!["state", "province", "state/province", "region"]),
        ("state_code", vec!["state code", "state abbreviation"]),
        ("zip_code", vec!["zip", "zip code", "postal code", "zipcode", "postcode"]),
        ("country", vec!["country", "country of residence"]),
        ("country_code", vec!["country code", "phone country code"]),
        ("linkedin", vec!["linkedin", "linkedin profile", "linkedin url", "linkedin profile url"]),
        ("github", vec!["github", "github profile", "github url", "github username"]),
        ("portfolio", vec!["portfolio", "portfolio url", "website", "personal website"]),
        ("other_links", vec!["other links", "additional links", "social media"]),
        (
            "work_authorization",
            vec!["work authorization", "authorized to work", "employment authorization", "right to work"],
        ),
        ("visa_status", vec!["visa status", "visa type", "immigration status", "current visa"]),
        (
            "require_sponsorship",
            vec!["visa sponsorship", "require sponsorship", "need sponsorship", "sponsorship required", "sponsorship"],
        ),
        ("gender", vec!["gender", "gender identity", "sex"]),
        ("race_ethnicity", vec!["race", "ethnicity", "race/ethnicity", "ethnic background"]),
        ("veteran_status", vec!["veteran", "veteran status", "military veteran"]),
        ("disability_status", vec!["disability", "disability status", "disabled"]),
        ("date_of_birth", vec!["date of birth", "birth date", "birthday", "dob"]),
        ("nationality", vec!["nationality", "citizenship"]),
        ("current_title", vec!["current title", "current position", "current role", "job title"]),
        ("current_company", vec!["current company", "current employer", "employer"]),
        (
            "years_experience",
            vec!["years of experience", "years experience", "experience years", "total experience"],
        ),
        ("university", vec!["university", "school", "college", "institution", "educational institution"]),
        ("degree", vec!["degree", "degree type", "education level", "highest degree"]),
        ("major", vec!["major", "field of study", "area of study", "specialization", "concentration"]),
        (
            "graduation_date",
            vec!["graduation date", "graduation year", "expected graduation", "grad date", "completion date"],
        ),
        ("gpa", vec!["gpa", "grade point average", "cumulative gpa"]),
        (
            "availability",
            vec!["start date", "availability", "available to start", "earliest start date", "when can you start"],
        ),
        (
            "salary_expectation",
            vec!["salary", "expected salary", "salary expectation", "salary requirements", "desired salary"],
        ),
        (
            "willing_to_relocate",
            vec!["relocate", "willing to relocate", "relocation", "open to relocation"],
        ),
        (
            "preferred_locations",
            vec!["preferred location", "location preference", "desired location", "work location"],
        ),
        ("source", vec!["how did you hear", "referral source", "how did you find", "source"]),
        ("cover_letter", vec!["cover letter", "letter of interest", "why do you want", "motivation"]),
        ("resume_path", vec!["resume", "cv", "curriculum vitae", "upload resume", "attach resume"]),
    ]
});

// ---------------------------------------------------------------------------
// Tier 2: regex patterns
// ---------------------------------------------------------------------------

static PATTERN_TABLE: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    let rx = |s: &str| Regex::new(s).unwrap();
    vec![
        ("first_name", vec![rx(r"(?i)^(first|given)\s*(name)?$"), rx(r"(?i)fname")]),
        ("last_name", vec![rx(r"(?i)^(last|family|sur)\s*(name)?$"), rx(r"(?i)lname")]),
        ("email", vec![rx(r"(?i)e[\s-]?mail"), rx(r"(?i)email\s*address")]),
        (
            "phone",
            vec![rx(r"(?i)(phone|mobile|cell|telephone)(\s*number)?"), rx(r"(?i)contact\s*number")],
        ),
        ("linkedin", vec![rx(r"(?i)linked\s*in"), rx(r"(?i)linkedin\s*(profile|url)?")]),
        (
            "work_authorization",
            vec![
                rx(r"(?i)(work|employment)\s*authorization"),
                rx(r"(?i)authorized\s*to\s*work"),
                rx(r"(?i)right\s*to\s*work"),
            ],
        ),
        (
            "require_sponsorship",
            vec![
                rx(r"(?i)(visa|work)?\s*sponsorship"),
                rx(r"(?i)require\s*sponsorship"),
                rx(r"(?i)need\s*sponsorship"),
            ],
        ),
        (
            "graduation_date",
            vec![
                rx(r"(?i)graduat(ion|e)\s*(date|year)"),
                rx(r"(?i)expected\s*graduat"),
                rx(r"(?i)complet(ion|e)\s*date"),
            ],
        ),
    ]
});

// ---------------------------------------------------------------------------
// Tier 3: semantic inference
// ---------------------------------------------------------------------------

static TERMS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bterms?\b",
        r"\bconditions?\b",
        r"\bagreement\b",
        r"\bconsent\b",
        r"\backnowledge\b",
        r"\bprivacy\s*policy\b",
        r"\baccept\b",
        r"\bagree\b",
        r"\bi\s*have\s*read\b",
        r"\bi\s*understand\b",
        r"\bconfirm\b",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect()
});

static WORKED_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(have you|do you|are you)\s*(ever\s*)?(worked|employed)\s*(at|for|with)\s+([a-zA-Z][a-zA-Z\s]*)").unwrap());
static AUTHORIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(authorized|eligible|permitted)\s*to\s*work").unwrap());
static SPONSORSHIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(require|need)\s*(visa\s*)?sponsorship").unwrap());
static RELOCATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(willing|open)\s*to\s*(relocate|relocation)").unwrap());
static ENROLLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(currently|presently)\s*(enrolled|pursuing|studying)").unwrap());
static GRADUATION_QUESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(expect|expected|when).{0,30}graduat|graduat.{0,20}(date|year)").unwrap());

/// Date formats accepted for education end dates, tried in order.
const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%m/%d/%Y", "%Y-%m %d", "%m/%Y %d", "%B %Y %d", "%b %Y %d"];

/// Parses "2025", "2025-05", "05/2025", "May 2025", "May 2025", full dates.
/// Bare years resolve to December 31; month-year forms to the 1st.
pub fn parse_flexible_date(input: &str) -> Option<chrono::NaiveDate> {
    let input = input.trim();
    if input.len() == 4 && input.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = input.parse().ok()?;
        return chrono::NaiveDate::from_ymd_opt(year, 12, 31);
    }
    for (i, format) in DATE_FORMATS.iter().enumerate() {
        // Formats past the first two need a day token appended.
        let candidate = if i < 2 { input.to_string() } else { format!("{} 1", input) };
        if let Ok(date) = chrono::NaiveDate::parse_from_str(&candidate, format) {
            return Some(date);
        }
    }
    None
}

/// Date-arithmetic enrollment: still enrolled iff any education end date
/// parses to a date after `today`. No reliance on a `current` flag.
pub fn currently_enrolled(profile: &Profile, today: chrono::NaiveDate) -> Option<bool> {
    for education in profile.education() {
        let end = if education.end_date.is_empty() {
            &education.graduation_date
        } else {
            &education.end_date
        };
        if end.is_empty() {
            continue;
        }
        if let Some(date) = parse_flexible_date(end) {
            let enrolled = date > today;
            debug!(
                target: "jobflow::detmap",
                end_date = %end,
                enrolled,
                "enrollment decided by date arithmetic"
            );
            return Some(enrolled);
        }
    }
    None
}

fn lookup(profile: &Profile, profile_key: &str) -> Option<String> {
    profile.render(profile_key).filter(|v| !v.trim().is_empty())
}

fn try_exact(label: &str, profile: &Profile) -> Option<Mapping> {
    for (profile_key, variants) in EXACT_TABLE.iter() {
        if variants.iter().any(|v| *v == label) {
            let value = lookup(profile, profile_key)?;
            return Some(Mapping::new(profile_key, value, 1.0, MapMethod::Exact));
        }
    }
    None
}

fn try_pattern(label: &str, profile: &Profile) -> Option<Mapping> {
    for (profile_key, patterns) in PATTERN_TABLE.iter() {
        if patterns.iter().any(|p| p.is_match(label)) {
            if let Some(value) = lookup(profile, profile_key) {
                return Some(Mapping::new(profile_key, value, 0.9, MapMethod::Pattern));
            }
        }
    }
    None
}

fn infer_worked_at(label: &str, profile: &Profile) -> Option<Mapping> {
    let captures = WORKED_AT.captures(label)?;
    let company_in_question = captures.get(5)?.as_str().trim().to_lowercase();
    let company_in_question = company_in_question.trim_end_matches('?').trim();
    if company_in_question.is_empty() {
        return None;
    }
    let worked = profile.work_experience().iter().any(|exp| {
        let company = exp.company.to_lowercase();
        !company.is_empty() && (company.contains(company_in_question) || company_in_question.contains(&company))
    });
    Some(Mapping::new(
        "work_experience",
        if worked { "Yes" } else { "No" },
        0.9,
        MapMethod::Semantic,
    ))
}

fn infer_work_authorization(profile: &Profile) -> Option<Mapping> {
    if let Some(value) = lookup(profile, "work_authorization") {
        return Some(Mapping::new("work_authorization", value, 0.9, MapMethod::Semantic));
    }
    let visa = profile.text("visa_status")?;
    if ["F-1", "H1B", "H-1B", "Green Card", "US Citizen"].contains(&visa) {
        return Some(Mapping::new("visa_status", "Yes", 0.7, MapMethod::Semantic));
    }
    None
}

/// Picks a graduation option by date arithmetic when the question offers
/// concrete dates (e.g. "May 2025" vs "I am not currently enrolled").
fn infer_graduation_option(
    profile: &Profile,
    options: &[String],
    today: chrono::NaiveDate,
) -> Option<Mapping> {
    let education = profile.education();
    let end_date = education
        .iter()
        .map(|e| if e.end_date.is_empty() { &e.graduation_date } else { &e.end_date })
        .find(|d| !d.is_empty())?;
    let parsed = parse_flexible_date(end_date)?;

    // Prefer the option that names the same date.
    for option in options {
        if let Some(option_date) = parse_flexible_date(option) {
            if option_date.format("%Y-%m").to_string() == parsed.format("%Y-%m").to_string() {
                return Some(Mapping::new("education", option.clone(), 0.9, MapMethod::Semantic));
            }
        }
    }
    // Otherwise answer by enrollment status, avoiding "not enrolled" options
    // while the end date is still in the future.
    let enrolled = parsed > today;
    let not_enrolled_option = options
        .iter()
        .find(|o| o.to_lowercase().contains("not currently enrolled") || o.to_lowercase().contains("not enrolled"));
    match (enrolled, not_enrolled_option) {
        (false, Some(option)) => Some(Mapping::new("education", option.clone(), 0.9, MapMethod::Semantic)),
        _ => None,
    }
}

fn try_semantic(
    label: &str,
    category: FieldCategory,
    options: &[String],
    profile: &Profile,
    today: chrono::NaiveDate,
) -> Option<Mapping> {
    // Terms/consent checkboxes are always checked, even when the element id
    // smells like a honeypot; visibility gating happens at detection.
    if matches!(category, FieldCategory::Checkbox | FieldCategory::CheckboxGroup)
        && TERMS_PATTERNS.iter().any(|p| p.is_match(label))
    {
        debug!(target: "jobflow::detmap", label, "terms checkbox auto-check");
        return Some(Mapping::new("terms_agreement", "true", 0.9, MapMethod::TermsAutocheck));
    }

    if let Some(mapping) = infer_worked_at(label, profile) {
        return Some(mapping);
    }
    if AUTHORIZED.is_match(label) {
        if let Some(mapping) = infer_work_authorization(profile) {
            return Some(mapping);
        }
    }
    if SPONSORSHIP.is_match(label) {
        if let Some(value) = lookup(profile, "require_sponsorship") {
            return Some(Mapping::new("require_sponsorship", value, 1.0, MapMethod::Semantic));
        }
    }
    if RELOCATION.is_match(label) {
        if let Some(value) = lookup(profile, "willing_to_relocate") {
            return Some(Mapping::new("willing_to_relocate", value, 1.0, MapMethod::Semantic));
        }
    }
    if ENROLLED.is_match(label) {
        if let Some(enrolled) = currently_enrolled(profile, today) {
            return Some(Mapping::new(
                "education",
                if enrolled { "Yes" } else { "No" },
                0.9,
                MapMethod::Semantic,
            ));
        }
    }
    if !options.is_empty() && GRADUATION_QUESTION.is_match(label) {
        if let Some(mapping) = infer_graduation_option(profile, options, today) {
            return Some(mapping);
        }
    }
    None
}

/// Maps one field deterministically. `None` means the field needs the model.
pub fn map_field(
    label: &str,
    category: FieldCategory,
    options: &[String],
    profile: &Profile,
    today: chrono::NaiveDate,
) -> Option<Mapping> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }
    if let Some(mapping) = try_exact(&normalized, profile) {
        return Some(mapping);
    }
    if let Some(mapping) = try_pattern(&normalized, profile) {
        return Some(mapping);
    }
    try_semantic(&normalized, category, options, profile, today)
}

// ---------------------------------------------------------------------------
// Dropdown value resolution
// ---------------------------------------------------------------------------

static DROPDOWN_TABLE: Lazy<Vec<(&'static str, Vec<(&'static str, Vec<&'static str>)>)>> = Lazy::new(|| {
    vec![
        (
            "gender",
            vec![
                ("Male", vec!["Male", "M", "Man", "male", "Man - He/Him", "Male (He/Him)"]),
                ("Female", vec!["Female", "F", "Woman", "female", "Woman - She/Her", "Female (She/Her)"]),
                (
                    "Non-binary",
                    vec!["Non-binary", "Non binary", "Nonbinary", "Other", "Non-Binary - They/Them", "Prefer not to say"],
                ),
            ],
        ),
        (
            "race_ethnicity",
            vec![
                (
                    "Asian",
                    vec![
                        "Asian",
                        "Asian American",
                        "South Asian",
                        "East Asian",
                        "Southeast Asian",
                        "Asian (Not Hispanic or Latino)",
                        "Asian/Pacific Islander",
                        "Asian - Indian",
                        "Asian - Other",
                    ],
                ),
                ("White", vec!["White", "Caucasian", "European", "White (Not Hispanic or Latino)", "White/Caucasian"]),
                (
                    "Black",
                    vec!["Black", "African American", "Black or African American", "African American/Black"],
                ),
                (
                    "Hispanic",
                    vec!["Hispanic", "Latino", "Hispanic or Latino", "Hispanic/Latino", "Latinx"],
                ),
                (
                    "Native American",
                    vec!["Native American", "American Indian", "Indigenous", "Alaska Native", "American Indian or Alaska Native"],
                ),
                (
                    "Two or More",
                    vec!["Two or More Races", "Multiple", "Multiracial", "Two or more races (Not Hispanic or Latino)"],
                ),
                (
                    "Prefer not to say",
                    vec![
                        "Prefer not to say",
                        "Decline to self identify",
                        "I don't wish to answer",
                        "Prefer not to disclose",
                        "Decline to answer",
                    ],
                ),
            ],
        ),
        (
            "work_authorization",
            vec![
                (
                    "Yes",
                    vec![
                        "Yes",
                        "Authorized",
                        "Yes, authorized",
                        "Legally authorized",
                        "I am authorized",
                        "Yes, I am authorized to work",
                        "Authorized to work",
                        "US Citizen or Permanent Resident",
                        "Citizen",
                        "Green Card Holder",
                        "Permanent Resident",
                    ],
                ),
                (
                    "No",
                    vec!["No", "Not authorized", "No, not authorized", "I am not authorized", "Not currently authorized"],
                ),
                ("F-1", vec!["F-1", "F1 Student", "Student Visa (F-1)", "F-1 Visa", "F-1 OPT", "OPT"]),
                ("H1B", vec!["H-1B", "H1B", "Work Visa (H-1B)", "H-1B Visa", "H1-B"]),
            ],
        ),
        (
            "require_sponsorship",
            vec![
                (
                    "Yes",
                    vec![
                        "Yes",
                        "Yes, I require sponsorship",
                        "I will require",
                        "Will require",
                        "Yes, now or in the future",
                        "Now or in the future",
                    ],
                ),
                (
                    "No",
                    vec![
                        "No",
                        "No, I do not require",
                        "I will not require",
                        "Will not require",
                        "Do not require sponsorship",
                        "No, I will not require",
                    ],
                ),
            ],
        ),
        (
            "degree",
            vec![
                (
                    "Bachelor",
                    vec![
                        "Bachelor",
                        "Bachelor's",
                        "BS",
                        "BA",
                        "B.S.",
                        "B.A.",
                        "Bachelors",
                        "Bachelor's Degree",
                        "Bachelor of Science",
                        "Bachelor of Arts",
                        "Undergraduate Degree",
                    ],
                ),
                (
                    "Master",
                    vec![
                        "Master",
                        "Master's",
                        "MS",
                        "MA",
                        "M.S.",
                        "M.A.",
                        "Masters",
                        "Master's Degree",
                        "Master of Science",
                        "Master of Arts",
                        "Graduate Degree",
                        "MBA",
                    ],
                ),
                (
                    "PhD",
                    vec!["PhD", "Ph.D.", "Doctorate", "Doctoral", "Doctoral Degree", "Doctor of Philosophy"],
                ),
                (
                    "Associate",
                    vec!["Associate", "Associate's", "AS", "AA", "A.S.", "A.A.", "Associate Degree", "Associate's Degree"],
                ),
                (
                    "High School",
                    vec!["High School", "High School Diploma", "Secondary School", "GED", "High School or equivalent"],
                ),
            ],
        ),
        (
            "veteran_status",
            vec![
                ("Yes", vec!["Yes", "Veteran", "I am a veteran", "Protected veteran", "Yes - I am a protected veteran"]),
                ("No", vec!["No", "Not a veteran", "I am not a veteran", "No - I am not a protected veteran", "Non-veteran"]),
            ],
        ),
        (
            "disability_status",
            vec![
                ("Yes", vec!["Yes", "Yes, I have a disability", "I have a disability", "Disabled"]),
                ("No", vec!["No", "No, I don't have a disability", "I do not have a disability", "Not disabled"]),
                (
                    "Prefer not to say",
                    vec!["Prefer not to say", "I don't wish to answer", "Decline to self identify", "Prefer not to disclose"],
                ),
            ],
        ),
        (
            "willing_to_relocate",
            vec![
                ("Yes", vec!["Yes", "Yes, willing", "Open to relocation", "Willing", "Will relocate"]),
                ("No", vec!["No", "Not willing", "Not open to relocation", "Will not relocate"]),
            ],
        ),
    ]
});

const STOP_WORDS: [&str; 14] = ["a", "an", "the", "of", "in", "on", "at", "to", "for", "with", "-", "/", "(", ")"];

/// Multi-signal similarity: exact, containment (length ratio), stop-word
/// trimmed Jaccard with a significant-word boost, and character overlap.
pub fn fuzzy_score(profile_value: &str, option: &str) -> f64 {
    let a = profile_value.to_lowercase().trim().to_string();
    let b = option.to_lowercase().trim().to_string();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let mut best = 0.0f64;
    if b.contains(&a) || a.contains(&b) {
        best = a.len().min(b.len()) as f64 / a.len().max(b.len()) as f64;
    }

    let tokens = |s: &str| -> std::collections::HashSet<String> {
        s.split_whitespace()
            .filter(|w| !STOP_WORDS.contains(w))
            .map(str::to_string)
            .collect()
    };
    let ta = tokens(&a);
    let tb = tokens(&b);
    if !ta.is_empty() && !tb.is_empty() {
        let intersection = ta.intersection(&tb).count() as f64;
        let union = ta.union(&tb).count() as f64;
        let mut jaccard = if union > 0.0 { intersection / union } else { 0.0 };
        if ta.iter().any(|w| w.len() > 3 && tb.contains(w)) {
            jaccard *= 1.2;
        }
        best = best.max(jaccard);
    }

    let overlap = a.chars().filter(|c| b.contains(*c)).count() as f64 / a.len().max(b.len()) as f64;
    best.max(overlap)
}

/// Maps a profile value onto the best available dropdown option: canonical
/// table first (exact, then partial), then fuzzy match above 0.7.
pub fn map_dropdown_value(field_type: &str, profile_value: &str, available_options: &[String]) -> Option<String> {
    if profile_value.trim().is_empty() {
        return None;
    }
    let valid: Vec<&String> = available_options.iter().filter(|o| !o.trim().is_empty()).collect();
    if valid.is_empty() {
        return None;
    }

    if let Some((_, mappings)) = DROPDOWN_TABLE.iter().find(|(name, _)| *name == field_type) {
        if let Some((_, candidates)) = mappings.iter().find(|(value, _)| *value == profile_value) {
            for option in &valid {
                if candidates.iter().any(|c| *c == option.as_str()) {
                    debug!(target: "jobflow::detmap", option = %option, "exact dropdown table match");
                    return Some((*option).clone());
                }
            }
            for option in &valid {
                let option_lower = option.to_lowercase();
                if candidates
                    .iter()
                    .any(|c| option_lower.contains(&c.to_lowercase()) || c.to_lowercase().contains(&option_lower))
                {
                    debug!(target: "jobflow::detmap", option = %option, "partial dropdown table match");
                    return Some((*option).clone());
                }
            }
        }
    }

    let mut best: Option<&String> = None;
    let mut best_score = 0.0f64;
    for option in &valid {
        let score = fuzzy_score(profile_value, option);
        if score > best_score {
            best_score = score;
            best = Some(option);
        }
    }
    if best_score > 0.7 {
        debug!(target: "jobflow::detmap", option = ?best, score = best_score, "fuzzy dropdown match");
        return best.cloned();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> Profile {
        Profile::from_json(json!({
            "first_name": "Asha",
            "last_name": "Rao",
            "email": "a@example.com",
            "phone": "+1-555-1111",
            "visa_status": "F-1",
            "require_sponsorship": "Yes",
            "willing_to_relocate": "Yes",
            "work_experience": [{"company": "ACME Corp", "title": "Engineer"}],
            "education": [{"institution": "State University", "degree": "MS", "end_date": "May 2025"}]
        }))
        .unwrap()
    }

    fn today() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    #[test]
    fn exact_matches_resolve_with_full_confidence() {
        let m = map_field("First Name *", FieldCategory::TextInput, &[], &profile(), today()).unwrap();
        assert_eq!(m.profile_key, "first_name");
        assert_eq!(m.value, "Asha");
        assert_eq!(m.confidence, 1.0);
        assert_eq!(m.method, MapMethod::Exact);
    }

    #[test]
    fn patterns_catch_label_variants() {
        let m = map_field("E-Mail", FieldCategory::TextInput, &[], &profile(), today()).unwrap();
        assert_eq!(m.profile_key, "email");
        assert_eq!(m.method, MapMethod::Exact); // "e-mail" is in the exact table
        let m = map_field("Preferred E mail Address", FieldCategory::TextInput, &[], &profile(), today()).unwrap();
        assert_eq!(m.profile_key, "email");
        assert_eq!(m.method, MapMethod::Pattern);
        assert_eq!(m.confidence, 0.9);
    }

    #[test]
    fn terms_checkbox_is_autochecked_even_with_honeypot_id() {
        // The honeypot-looking id is irrelevant; the rule keys off the label.
        let m = map_field(
            "I agree to the terms and conditions",
            FieldCategory::Checkbox,
            &[],
            &profile(),
            today(),
        )
        .unwrap();
        assert_eq!(m.value, "true");
        assert_eq!(m.confidence, 0.9);
        assert_eq!(m.method, MapMethod::TermsAutocheck);
    }

    #[test]
    fn worked_at_company_answers_from_experience() {
        let yes = map_field(
            "Have you ever worked at ACME Corp?",
            FieldCategory::RadioGroup,
            &[],
            &profile(),
            today(),
        )
        .unwrap();
        assert_eq!(yes.value, "Yes");
        let no = map_field(
            "Have you ever worked for Initech?",
            FieldCategory::RadioGroup,
            &[],
            &profile(),
            today(),
        )
        .unwrap();
        assert_eq!(no.value, "No");
    }

    #[test]
    fn authorization_and_sponsorship_use_profile_fields() {
        let auth = map_field("Are you authorized to work in the US?", FieldCategory::RadioGroup, &[], &profile(), today())
            .unwrap();
        assert_eq!(auth.value, "Yes"); // F-1 implies authorized
        let sponsor = map_field("Will you require visa sponsorship?", FieldCategory::RadioGroup, &[], &profile(), today())
            .unwrap();
        assert_eq!(sponsor.value, "Yes");
    }

    #[test]
    fn enrollment_is_pure_date_arithmetic() {
        assert_eq!(currently_enrolled(&profile(), today()), Some(true));

        let graduated = Profile::from_json(json!({
            "education": [{"end_date": "May 2023"}]
        }))
        .unwrap();
        assert_eq!(currently_enrolled(&graduated, today()), Some(false));

        let m = map_field("Are you currently enrolled in a degree program?", FieldCategory::RadioGroup, &[], &profile(), today())
            .unwrap();
        assert_eq!(m.value, "Yes");
    }

    #[test]
    fn graduation_options_are_picked_by_date() {
        let options = vec![
            "May 2025".to_string(),
            "December 2025".to_string(),
            "I am not currently enrolled".to_string(),
        ];
        let m = map_field(
            "When do you expect to graduate?",
            FieldCategory::RadioGroup,
            &options,
            &profile(),
            today(),
        )
        .unwrap();
        assert_eq!(m.value, "May 2025");
    }

    #[test]
    fn flexible_dates_parse_all_documented_formats() {
        let date = |y, m, d| chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(parse_flexible_date("2025"), Some(date(2025, 12, 31)));
        assert_eq!(parse_flexible_date("2025-05"), Some(date(2025, 5, 1)));
        assert_eq!(parse_flexible_date("05/2025"), Some(date(2025, 5, 1)));
        assert_eq!(parse_flexible_date("May 2025"), Some(date(2025, 5, 1)));
        assert_eq!(parse_flexible_date("Sep 2025"), Some(date(2025, 9, 1)));
        assert_eq!(parse_flexible_date("2025-05-15"), Some(date(2025, 5, 15)));
        assert_eq!(parse_flexible_date("05/15/2025"), Some(date(2025, 5, 15)));
        assert_eq!(parse_flexible_date("soon"), None);
    }

    #[test]
    fn dropdown_values_resolve_through_the_canonical_table() {
        let options = vec![
            "Man - He/Him".to_string(),
            "Woman - She/Her".to_string(),
            "Prefer not to say".to_string(),
        ];
        // "Man - He/Him" partial-matches the canonical "Man" candidate.
        assert_eq!(map_dropdown_value("gender", "Male", &options).unwrap(), "Man - He/Him");

        let veteran = vec!["I am not a veteran".to_string(), "Protected veteran".to_string()];
        assert_eq!(map_dropdown_value("veteran_status", "No", &veteran).unwrap(), "I am not a veteran");
    }

    #[test]
    fn fuzzy_fallback_requires_the_similarity_gate() {
        let options = vec!["Software Engineering".to_string(), "Marketing".to_string()];
        assert_eq!(
            map_dropdown_value("department", "software engineering", &options).unwrap(),
            "Software Engineering"
        );
        assert_eq!(map_dropdown_value("department", "zoology", &options), None);
    }

    #[test]
    fn label_normalization_strips_noise() {
        assert_eq!(normalize_label("  First   Name *"), "first name");
        assert_eq!(normalize_label("Email:"), "email");
    }
}
