//! ATS-specific dropdown drivers: Greenhouse/React-Select, Workday, Lever,
//! Ashby button groups, and a generic fallback. Vendor detection runs per
//! element right before interaction; every driver verifies by reading the
//! control back and only reports success on a real match.

use crate::detmap::fuzzy_score;
use crate::error::FormResult;
use crate::page::{attr_or_empty, ElementRef, Page};
use std::time::Duration;
use tracing::{debug, warn};

const TYPE_DELAY_MS: u64 = 20;
const FILTER_WAIT_MS: u64 = 400;
const STABILITY_WAIT_MS: u64 = 200;

/// Which ATS widget family an element belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Greenhouse,
    Workday,
    Lever,
    Ashby,
    Generic,
}

/// Detects the widget family from element attributes.
pub async fn detect_vendor(element: &ElementRef) -> FormResult<Vendor> {
    let role = attr_or_empty(element.as_ref(), "role").await;
    let haspopup = attr_or_empty(element.as_ref(), "aria-haspopup").await;
    if role == "combobox" && haspopup == "true" {
        return Ok(Vendor::Greenhouse);
    }
    let automation_id = attr_or_empty(element.as_ref(), "data-automation-id").await;
    if automation_id.contains("dropdown") {
        return Ok(Vendor::Workday);
    }
    if element.tag_name().await? == "select" {
        let class = attr_or_empty(element.as_ref(), "class").await;
        if class.contains("lever") || class.contains("application-field") {
            return Ok(Vendor::Lever);
        }
    }
    let testid = attr_or_empty(element.as_ref(), "data-testid").await;
    if role == "button" && testid.contains("option") {
        return Ok(Vendor::Ashby);
    }
    Ok(Vendor::Generic)
}

/// Fills a dropdown through its vendor driver. Returns whether a verified
/// selection was made.
pub async fn fill_dropdown(page: &dyn Page, element: &ElementRef, value: &str, label: &str) -> FormResult<bool> {
    match detect_vendor(element).await? {
        Vendor::Greenhouse => fill_greenhouse(page, element, value, label).await,
        Vendor::Workday => fill_workday(page, element, value, label).await,
        Vendor::Lever => fill_lever(element, value).await,
        Vendor::Ashby => fill_ashby(element, value).await,
        Vendor::Generic => fill_generic(page, element, value, label).await,
    }
}

// ---------------------------------------------------------------------------
// Matching helpers
// ---------------------------------------------------------------------------

/// Collapses long-form degree names so "Master of Science in CS" matches a
/// profile value of "Master's".
pub fn normalize_degree(text: &str) -> String {
    let mut text = text.to_lowercase().trim().to_string();
    let replacements = [
        ("master of science", "master's"),
        ("master of arts", "master's"),
        ("master of business administration", "master's"),
        ("master of engineering", "master's"),
        ("bachelor of science", "bachelor's"),
        ("bachelor of arts", "bachelor's"),
        ("bachelor of engineering", "bachelor's"),
        ("doctor of philosophy", "doctorate"),
        ("ph.d.", "doctorate"),
        ("phd", "doctorate"),
        ("m.s.", "master's"),
        ("m.a.", "master's"),
        ("m.b.a.", "master's"),
        ("b.s.", "bachelor's"),
        ("b.a.", "bachelor's"),
    ];
    for (from, to) in replacements {
        if text.contains(from) {
            text = text.replace(from, to);
        }
    }
    text
}

/// Jaccard overlap of significant tokens (stop words and one-letter tokens
/// removed).
pub fn token_overlap_score(a: &str, b: &str) -> f64 {
    let stop = ["of", "the", "in", "a", "an", "degree", "(", ")", ".", ","];
    let tokens = |s: &str| -> std::collections::HashSet<String> {
        s.to_lowercase()
            .split_whitespace()
            .filter(|t| !stop.contains(t) && t.len() > 1)
            .map(str::to_string)
            .collect()
    };
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Scores one visible option text against the wanted value; the Greenhouse
/// driver clicks the best option scoring at or above 0.3.
pub fn option_score(value: &str, option_text: &str) -> f64 {
    let value_lower = value.to_lowercase();
    let text_lower = option_text.to_lowercase();
    if value_lower == text_lower {
        return 1.0;
    }
    let mut best = 0.0f64;

    let normalized_value = normalize_degree(&value_lower);
    let normalized_text = normalize_degree(&text_lower);
    if normalized_value.contains(&normalized_text) || normalized_text.contains(&normalized_value) {
        best = 0.9;
    }

    let token_score = token_overlap_score(&value_lower, &text_lower);
    if token_score > 0.5 {
        best = best.max(token_score);
    }

    if text_lower.contains(&value_lower) {
        best = best.max(value_lower.len() as f64 / text_lower.len() as f64);
    } else if value_lower.contains(&text_lower) {
        best = best.max(text_lower.len() as f64 / value_lower.len() as f64);
    }

    best
}

/// Read-back verification: the selection display (or input value) must
/// resemble what we asked for.
fn verifies(value: &str, read_back: &str) -> bool {
    let read = read_back.trim().to_lowercase();
    if read.is_empty() {
        return false;
    }
    let wanted = value.trim().to_lowercase();
    if read.contains(&wanted) || wanted.contains(&read) {
        return true;
    }
    option_score(value, read_back) >= 0.3 || fuzzy_score(value, read_back) >= 0.3
}

async fn read_selection(element: &ElementRef) -> FormResult<String> {
    let value = element.input_value().await.unwrap_or_default();
    if !value.trim().is_empty() {
        return Ok(value);
    }
    // React-Select keeps the selection in a sibling display node, not the
    // text input.
    if let Some(parent) = element.parent().await? {
        for selector in ["[class*=\"singleValue\"]", ".select__single-value", "div[data-value]"] {
            if let Some(display) = parent.query_all(selector).await?.into_iter().next() {
                let text = display.text().await?;
                if !text.trim().is_empty() && !text.to_lowercase().contains("select") {
                    return Ok(text);
                }
            }
        }
    }
    Ok(String::new())
}

// ---------------------------------------------------------------------------
// Greenhouse / React-Select
// ---------------------------------------------------------------------------

const MENU_SELECTORS: [&str; 5] = [
    "[class*=\"select__menu\"]",
    "[id*=\"react-select\"][id*=\"listbox\"]",
    "div[class*=\"MenuList\"]",
    "[role=\"listbox\"]",
    "div[class*=\"option\"]",
];

const OPTION_SELECTORS: [&str; 6] = [
    "[class*=\"select__option\"]",
    "div[class*=\"option\"]:not([class*=\"placeholder\"]):not([class*=\"input\"])",
    "[role=\"option\"]",
    "[id*=\"react-select\"][id*=\"option\"]",
    "div[class*=\"Option\"]",
    "li[role=\"option\"]",
];

async fn visible_options(page: &dyn Page, menu: Option<&ElementRef>) -> FormResult<Vec<(ElementRef, String)>> {
    let mut found = Vec::new();
    // Search inside the menu first, then page-wide (React portals render at
    // the document root).
    let mut contexts: Vec<Option<&ElementRef>> = Vec::new();
    if menu.is_some() {
        contexts.push(menu);
    }
    contexts.push(None);

    for context in contexts {
        for selector in OPTION_SELECTORS {
            let candidates = match context {
                Some(scope) => scope.query_all(selector).await?,
                None => page.query_all(selector).await?,
            };
            for candidate in candidates.into_iter().take(30) {
                if !candidate.is_visible().await.unwrap_or(false) {
                    continue;
                }
                let text = candidate.text().await?;
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("no options") {
                    continue;
                }
                found.push((candidate, trimmed.to_string()));
            }
            if !found.is_empty() {
                return Ok(found);
            }
        }
    }
    Ok(found)
}

/// Escalating click ladder for React-Select options: trusted click, script
/// click, synthetic mouse events, then one more trusted attempt.
async fn click_option(option: &ElementRef, option_text: &str) -> bool {
    if option.click().await.is_ok() {
        return true;
    }
    debug!(target: "jobflow::widgets", option = option_text, "standard click failed; escalating");
    if option.js_click().await.is_ok() {
        return true;
    }
    if option.dispatch_click_events().await.is_ok() {
        return true;
    }
    option.click().await.is_ok()
}

/// Full Greenhouse sequence: settle, clear, open, type-to-filter, scan the
/// menu ladder, match (exact -> degree-normalized -> token overlap ->
/// containment), click with escalation, and fall back to an unfiltered
/// rescan and finally a bare Enter.
pub async fn fill_greenhouse(page: &dyn Page, element: &ElementRef, value: &str, label: &str) -> FormResult<bool> {
    debug!(target: "jobflow::widgets", label, value, "greenhouse dropdown fill");

    if attr_or_empty(element.as_ref(), "aria-expanded").await == "true" {
        let _ = element.press_key("Escape").await;
        tokio::time::sleep(Duration::from_millis(STABILITY_WAIT_MS)).await;
    }

    element.focus().await?;
    element.clear().await?;
    element.click().await?;
    tokio::time::sleep(Duration::from_millis(STABILITY_WAIT_MS)).await;

    element.type_text(value, TYPE_DELAY_MS).await?;
    tokio::time::sleep(Duration::from_millis(FILTER_WAIT_MS)).await;

    let mut menu = None;
    for selector in MENU_SELECTORS {
        if let Some(candidate) = page.query(selector).await? {
            if candidate.is_visible().await.unwrap_or(false) {
                menu = Some(candidate);
                break;
            }
        }
    }

    let mut options = visible_options(page, menu.as_ref()).await?;

    if options.is_empty() {
        // Filter produced nothing: clear and browse the unfiltered list.
        debug!(target: "jobflow::widgets", label, "no filtered options; rescanning unfiltered");
        element.clear().await?;
        tokio::time::sleep(Duration::from_millis(FILTER_WAIT_MS)).await;
        options = visible_options(page, menu.as_ref()).await?;
    }

    if options.is_empty() {
        warn!(target: "jobflow::widgets", label, "no visible options; trying Enter");
        element.press_key("Enter").await?;
        tokio::time::sleep(Duration::from_millis(STABILITY_WAIT_MS)).await;
        let final_value = read_selection(element).await?;
        return Ok(!final_value.trim().is_empty());
    }

    let mut best: Option<(&ElementRef, &str, f64)> = None;
    for (option, text) in &options {
        if text.eq_ignore_ascii_case(value) {
            if click_option(option, text).await {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let read = read_selection(element).await?;
                return Ok(verifies(value, &read));
            }
        }
        let score = option_score(value, text);
        if best.map(|(_, _, s)| score > s).unwrap_or(true) {
            best = Some((option, text, score));
        }
    }

    if let Some((option, text, score)) = best {
        if score >= 0.3 {
            debug!(target: "jobflow::widgets", option = text, score, "matched option");
            if click_option(option, text).await {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let read = read_selection(element).await?;
                return Ok(verifies(value, &read));
            }
        }
    }

    warn!(target: "jobflow::widgets", label, value, "no matching option; trying Enter");
    element.press_key("Enter").await?;
    tokio::time::sleep(Duration::from_millis(STABILITY_WAIT_MS)).await;
    let final_value = read_selection(element).await?;
    Ok(!final_value.trim().is_empty())
}

/// One value of a Greenhouse multi-select. The menu stays open between
/// selections; the caller passes `is_last` so the final value closes it.
pub async fn fill_greenhouse_multiselect(
    page: &dyn Page,
    element: &ElementRef,
    value: &str,
    label: &str,
    is_last: bool,
) -> FormResult<bool> {
    let selected = fill_greenhouse(page, element, value, label).await?;
    if is_last {
        let _ = element.press_key("Escape").await;
    }
    Ok(selected)
}

// ---------------------------------------------------------------------------
// Workday
// ---------------------------------------------------------------------------

/// Workday: click to open, wait for the dropdown list, click the matching
/// option (exact text first, then containment).
pub async fn fill_workday(page: &dyn Page, element: &ElementRef, value: &str, label: &str) -> FormResult<bool> {
    debug!(target: "jobflow::widgets", label, value, "workday dropdown fill");
    element.click().await?;

    let mut list = None;
    for _ in 0..10 {
        if let Some(candidate) = page.query("[data-automation-id*=\"dropdown-list\"]").await? {
            if candidate.is_visible().await.unwrap_or(false) {
                list = Some(candidate);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(STABILITY_WAIT_MS)).await;
    }
    let Some(list) = list else {
        return Ok(false);
    };

    let options = list.query_all("[role=\"option\"], li, div").await?;
    let mut containment: Option<ElementRef> = None;
    for option in options {
        if !option.is_visible().await.unwrap_or(false) {
            continue;
        }
        let text = option.text().await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case(value) {
            option.click().await?;
            let read = read_selection(element).await?;
            return Ok(verifies(value, &read));
        }
        if containment.is_none() && trimmed.to_lowercase().contains(&value.to_lowercase()) {
            containment = Some(option);
        }
    }
    if let Some(option) = containment {
        option.click().await?;
        let read = read_selection(element).await?;
        return Ok(verifies(value, &read));
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Lever (native select)
// ---------------------------------------------------------------------------

/// Lever uses plain `<select>`: select by label, then by containment index.
pub async fn fill_lever(element: &ElementRef, value: &str) -> FormResult<bool> {
    if element.select_option_by_label(value).await? {
        let read = element.input_value().await?;
        return Ok(verifies(value, &read));
    }
    let options = element.query_all("option").await?;
    for (index, option) in options.iter().enumerate() {
        let text = option.text().await?;
        if text.to_lowercase().contains(&value.to_lowercase()) && element.select_option_by_index(index).await? {
            let read = element.input_value().await?;
            return Ok(verifies(value, &read));
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Ashby button groups
// ---------------------------------------------------------------------------

/// Ashby renders choices as sibling buttons; click the one whose text
/// contains the value and verify via `aria-pressed`.
pub async fn fill_ashby(element: &ElementRef, value: &str) -> FormResult<bool> {
    let Some(parent) = element.parent().await? else {
        return Ok(false);
    };
    let buttons = parent.query_all("button[role=\"button\"]").await?;
    for button in buttons {
        let text = button.text().await?;
        if text.to_lowercase().contains(&value.to_lowercase()) {
            button.click().await?;
            let pressed = attr_or_empty(button.as_ref(), "aria-pressed").await;
            return Ok(pressed == "true" || verifies(value, &text));
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Generic fallback
// ---------------------------------------------------------------------------

/// Last-resort ladder: Greenhouse pattern, native select, click-type-Enter,
/// then direct assignment with dispatched input/change events.
pub async fn fill_generic(page: &dyn Page, element: &ElementRef, value: &str, label: &str) -> FormResult<bool> {
    if fill_greenhouse(page, element, value, label).await.unwrap_or(false) {
        return Ok(true);
    }
    if element.tag_name().await? == "select" && element.select_option_by_label(value).await? {
        return Ok(true);
    }
    if element.click().await.is_ok() {
        element.type_text(value, TYPE_DELAY_MS).await?;
        tokio::time::sleep(Duration::from_millis(FILTER_WAIT_MS)).await;
        element.press_key("Enter").await?;
        let read = read_selection(element).await?;
        if verifies(value, &read) {
            return Ok(true);
        }
    }
    element.force_set_value(value).await?;
    let read = element.input_value().await?;
    Ok(verifies(value, &read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fake::FakePage;

    #[test]
    fn degree_normalization_collapses_long_forms() {
        assert_eq!(normalize_degree("Master of Science in Computer Science"), "master's in computer science");
        assert_eq!(normalize_degree("Ph.D. in Physics"), "doctorate in physics");
        assert_eq!(normalize_degree("B.S."), "bachelor's");
    }

    #[test]
    fn option_scoring_ranks_the_right_degree() {
        let options = [
            "Bachelor of Science",
            "Master of Science in Computer Science",
            "Doctor of Philosophy",
        ];
        let scores: Vec<f64> = options.iter().map(|o| option_score("Master's", o)).collect();
        assert!(scores[1] >= 0.9, "expected normalized degree score >= 0.9, got {}", scores[1]);
        assert!(scores[1] > scores[0]);
        assert!(scores[1] > scores[2]);
    }

    #[tokio::test]
    async fn greenhouse_selects_via_degree_normalization() {
        let page = FakePage::from_html(
            r#"
            <div>
              <input role="combobox" aria-haspopup="true" id="degree" name="degree">
              <div data-fake-menu-for="degree" class="select__menu">
                <div class="select__option">Bachelor of Science</div>
                <div class="select__option">Master of Science in Computer Science</div>
                <div class="select__option">Doctor of Philosophy</div>
              </div>
            </div>
        "#,
        );
        let combo = page.query("#degree").await.unwrap().unwrap();
        assert_eq!(detect_vendor(&combo).await.unwrap(), Vendor::Greenhouse);

        // Typing "Master's" filters everything out (no apostrophe matches),
        // so the driver rescans unfiltered and matches by normalization.
        let ok = fill_greenhouse(&page, &combo, "Master's", "Degree").await.unwrap();
        assert!(ok);
        assert_eq!(page.value_of("degree").unwrap(), "Master of Science in Computer Science");
    }

    #[tokio::test]
    async fn greenhouse_exact_match_wins_immediately() {
        let page = FakePage::from_html(
            r#"
            <div>
              <input role="combobox" aria-haspopup="true" id="gender">
              <div data-fake-menu-for="gender" class="select__menu">
                <div class="select__option">Male</div>
                <div class="select__option">Female</div>
              </div>
            </div>
        "#,
        );
        let combo = page.query("#gender").await.unwrap().unwrap();
        assert!(fill_greenhouse(&page, &combo, "Female", "Gender").await.unwrap());
        assert_eq!(page.value_of("gender").unwrap(), "Female");
    }

    #[tokio::test]
    async fn workday_clicks_the_matching_list_option() {
        let page = FakePage::from_html(
            r#"
            <div>
              <div data-automation-id="country-dropdown" id="country" role="button">Select country</div>
              <div data-fake-menu-for="country" data-automation-id="dropdown-list">
                <div role="option">United States of America</div>
                <div role="option">Canada</div>
              </div>
            </div>
        "#,
        );
        let trigger = page.query("#country").await.unwrap().unwrap();
        assert_eq!(detect_vendor(&trigger).await.unwrap(), Vendor::Workday);
        assert!(fill_workday(&page, &trigger, "United States of America", "Country").await.unwrap());
        assert_eq!(page.value_of("country").unwrap(), "United States of America");
    }

    #[tokio::test]
    async fn lever_native_select_falls_back_to_containment() {
        let page = FakePage::from_html(
            r#"
            <select class="application-field" id="auth">
              <option>Yes, I am authorized</option>
              <option>No, I am not authorized</option>
            </select>
        "#,
        );
        let select = page.query("#auth").await.unwrap().unwrap();
        assert_eq!(detect_vendor(&select).await.unwrap(), Vendor::Lever);
        // No exact label "Yes" option; containment picks the first.
        assert!(fill_lever(&select, "Yes").await.unwrap());
        assert_eq!(page.value_of("auth").unwrap(), "Yes, I am authorized");
    }

    #[tokio::test]
    async fn ashby_button_group_clicks_by_text() {
        let page = FakePage::from_html(
            r#"
            <div>
              <button role="button" data-testid="option-yes" id="b_yes">Yes</button>
              <button role="button" data-testid="option-no" id="b_no">No</button>
            </div>
        "#,
        );
        let yes = page.query("#b_yes").await.unwrap().unwrap();
        assert_eq!(detect_vendor(&yes).await.unwrap(), Vendor::Ashby);
        assert!(fill_ashby(&yes, "No").await.unwrap());
        assert!(page.click_log().contains(&"No".to_string()));
    }
}
