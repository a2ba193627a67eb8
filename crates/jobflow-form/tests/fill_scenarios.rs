//! End-to-end fill-loop scenarios against the in-process page fake:
//! deterministic-only pages, date-arithmetic radio groups, model-assisted
//! essays, the submit guard, and completion idempotence.

use async_trait::async_trait;
use jobflow_core::error::Result as CoreResult;
use jobflow_core::gemini::TextModel;
use jobflow_core::patterns::PatternStore;
use jobflow_core::profile::Profile;
use jobflow_core::store::KvStore;
use jobflow_form::orchestrator::FormFiller;
use jobflow_form::page::fake::FakePage;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Model fake that replays scripted responses in call order.
struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> CoreResult<String> {
        *self.calls.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(String::new())
        } else {
            Ok(responses.remove(0))
        }
    }
}

fn basic_profile() -> Profile {
    Profile::from_json(json!({
        "first_name": "Asha",
        "last_name": "Rao",
        "email": "a@example.com",
        "phone": "+1-555-1111",
    }))
    .unwrap()
}

#[tokio::test]
async fn deterministic_path_fills_a_contact_page_without_the_model() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="first_name">First Name</label><input type="text" id="first_name">
          <label for="last_name">Last Name</label><input type="text" id="last_name">
          <label for="email">Email Address</label><input type="text" id="email">
          <label for="phone">Mobile Number</label><input type="text" id="phone">
        </form>
    "#,
    );

    let filler = FormFiller::new(&page).with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&basic_profile()).await;

    assert!(report.success);
    assert_eq!(report.fields_by_method.deterministic, 4);
    assert_eq!(report.fields_by_method.ai, 0);
    assert_eq!(page.value_of("first_name").unwrap(), "Asha");
    assert_eq!(page.value_of("last_name").unwrap(), "Rao");
    assert_eq!(page.value_of("email").unwrap(), "a@example.com");
    assert_eq!(page.value_of("phone").unwrap(), "+1-555-1111");
}

#[tokio::test]
async fn graduation_radio_group_is_answered_by_date_arithmetic() {
    let page = FakePage::from_html(
        r#"
        <fieldset>
          <legend>When do you expect to graduate?</legend>
          <label><input type="radio" name="grad" id="g_may" value="may25">May 2025</label>
          <label><input type="radio" name="grad" id="g_dec" value="dec25">December 2025</label>
          <label><input type="radio" name="grad" id="g_none" value="none">I am not currently enrolled</label>
        </fieldset>
    "#,
    );
    let profile = Profile::from_json(json!({
        "first_name": "Asha",
        "education": [{"institution": "State University", "degree": "MS", "end_date": "May 2025"}]
    }))
    .unwrap();

    let filler = FormFiller::new(&page)
        .with_dynamic_wait(Duration::from_millis(10))
        .with_today(chrono::NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
    let report = filler.fill_form(&profile).await;

    assert!(report.success);
    assert_eq!(report.fields_by_method.deterministic, 1);
    assert!(page.checked_of("g_may").unwrap());
    assert!(!page.checked_of("g_none").unwrap());
}

#[tokio::test]
async fn manual_essay_goes_through_the_model_batch() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="why_acme">Why do you want to work at ACME?</label>
          <textarea id="why_acme"></textarea>
        </form>
    "#,
    );
    let essay = "Because ACME builds systems I admire and my orchestration background fits the team.";
    let model = ScriptedModel::new(vec![
        // Batch classification.
        "ID: textarea_why_acme -> MANUAL: motivation essay",
        // Generated essay text.
        essay,
        // Final review (parsed from the plain completion).
        r#"{"approved": true, "issues": [], "confidence": 0.95}"#,
    ]);

    let filler = FormFiller::new(&page)
        .with_model(&model)
        .with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&basic_profile()).await;

    assert!(report.success);
    assert_eq!(report.fields_by_method.ai, 1);
    assert_eq!(page.value_of("why_acme").unwrap(), essay);
    assert!(page.value_of("why_acme").unwrap().len() <= 1000);
    let review = report.review.unwrap();
    assert!(review.approved);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn submit_only_page_finishes_without_clicking_anything() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="email">Email Address</label><input type="text" id="email">
          <button type="submit">Submit Application</button>
        </form>
    "#,
    );

    let filler = FormFiller::new(&page).with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&basic_profile()).await;

    assert!(report.success);
    assert!(!report.next_button_clicked);
    assert!(!page.click_log().iter().any(|c| c.contains("Submit Application")));
}

#[tokio::test]
async fn continue_is_clicked_but_submit_never_is() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="email">Email Address</label><input type="text" id="email">
          <button type="button">Save</button>
          <button type="submit">Submit application</button>
          <button type="button">Continue</button>
        </form>
    "#,
    );

    let filler = FormFiller::new(&page).with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&basic_profile()).await;

    assert!(report.next_button_clicked);
    let clicks = page.click_log();
    assert!(clicks.contains(&"Continue".to_string()));
    assert!(!clicks.iter().any(|c| c.to_lowercase().contains("submit")));
}

#[tokio::test]
async fn refilling_a_completed_page_writes_nothing() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="first_name">First Name</label><input type="text" id="first_name">
          <label for="email">Email Address</label><input type="text" id="email">
        </form>
    "#,
    );

    let filler = FormFiller::new(&page).with_dynamic_wait(Duration::from_millis(10));
    let first = filler.fill_form(&basic_profile()).await;
    assert!(first.success);
    assert_eq!(first.total_fields_filled, 2);
    let typed_after_first = page.typed_log().len();

    let second = filler.fill_form(&basic_profile()).await;
    assert!(second.success);
    assert_eq!(second.total_fields_filled, 0);
    // Zero keystrokes in the second pass.
    assert_eq!(page.typed_log().len(), typed_after_first);
    assert_eq!(page.value_of("first_name").unwrap(), "Asha");
}

#[tokio::test]
async fn terms_checkbox_with_honeypot_id_is_checked() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label><input type="checkbox" id="honey-pot-0" name="acknowledgement">I agree to the terms and conditions</label>
        </form>
    "#,
    );

    let filler = FormFiller::new(&page).with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&Profile::new()).await;

    assert!(report.success);
    assert_eq!(page.checked_of("honey-pot-0"), Some(true));
    assert_eq!(report.fields_by_method.deterministic, 1);
}

#[tokio::test]
async fn learned_patterns_fill_before_the_model_is_asked() {
    let store = Arc::new(KvStore::open_temporary().unwrap());
    let patterns = PatternStore::new(store);
    // Two prior confirmations push confidence well over the threshold.
    patterns.record(None, "Preferred Pronouns", "text_input", "gender", true).unwrap();
    patterns.record(None, "Preferred Pronouns", "text_input", "gender", true).unwrap();

    let page = FakePage::from_html(
        r#"
        <form>
          <label for="pronouns">Preferred Pronouns</label>
          <input type="text" id="pronouns">
        </form>
    "#,
    );
    let profile = Profile::from_json(json!({ "gender": "Female" })).unwrap();

    // No model wired: only the learned tier can answer.
    let filler = FormFiller::new(&page)
        .with_patterns(&patterns, None)
        .with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&profile).await;

    assert!(report.success);
    assert_eq!(report.fields_by_method.learned_pattern, 1);
    assert_eq!(page.value_of("pronouns").unwrap(), "Female");
    // The successful reuse bumped the stored confidence again.
    let looked_up = patterns.lookup(None, "preferred pronouns", "text_input").unwrap().unwrap();
    assert_eq!(looked_up.success_count, 3);
}

#[tokio::test]
async fn corrections_rewrite_flagged_fields_and_rereview_once() {
    let page = FakePage::from_html(
        r#"
        <form>
          <label for="email">Email Address</label><input type="text" id="email">
        </form>
    "#,
    );
    let model = ScriptedModel::new(vec![
        // First review: rejected.
        r#"{"approved": false, "issues": ["Email is stale"], "confidence": 0.8}"#,
        // Corrections array.
        r#"[{"field_name": "Email Address", "current_value": "a@example.com", "corrected_value": "asha@new.example", "reason": "profile updated"}]"#,
        // Re-review: approved.
        r#"{"approved": true, "issues": [], "confidence": 0.9}"#,
    ]);

    let filler = FormFiller::new(&page)
        .with_model(&model)
        .with_dynamic_wait(Duration::from_millis(10));
    let report = filler.fill_form(&basic_profile()).await;

    assert!(report.success);
    assert_eq!(page.value_of("email").unwrap(), "asha@new.example");
    assert!(report.review.unwrap().approved);
    assert_eq!(
        report.filled_fields.iter().find(|(l, _)| l == "Email Address").unwrap().1,
        "asha@new.example"
    );
}
