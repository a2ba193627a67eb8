//! Learned-pattern store: persistent `(label, category) -> profile field`
//! mappings with confidence, recorded when the LLM mapper succeeds and
//! decayed when a learned fill fails. Lets the filler skip the LLM for
//! questions it has answered before.

use crate::error::Result;
use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const TREE: &str = "learned_patterns";

/// Fresh records start at this prior before the first success update, so one
/// confirmed AI mapping is enough to clear the lookup threshold next time.
const INITIAL_CONFIDENCE: f64 = 0.5;
const ALPHA_SUCCESS: f64 = 0.3;
const ALPHA_FAILURE: f64 = 0.5;

/// Minimum confidence a pattern needs before lookups return it.
pub const LOOKUP_THRESHOLD: f64 = 0.5;

/// One learned mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub label_normalized: String,
    pub field_category: String,
    pub profile_field: String,
    pub confidence: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: chrono::DateTime<chrono::Utc>,
    pub user_id: Option<Uuid>,
}

/// Persistent pattern store. Writes are idempotent given
/// `(normalized_label, category, profile_field, user_id)`.
pub struct PatternStore {
    store: Arc<KvStore>,
}

fn normalize_label(label: &str) -> String {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c| c == '*' || c == ':' || c == ' ')
        .to_lowercase()
}

fn key(user_id: Option<Uuid>, label: &str, category: &str, profile_field: &str) -> String {
    format!(
        "{}\u{0}{}\u{0}{}\u{0}{}",
        user_id.map(|u| u.to_string()).unwrap_or_default(),
        normalize_label(label),
        category,
        profile_field
    )
}

fn lookup_prefix(user_id: Option<Uuid>, label: &str, category: &str) -> String {
    format!(
        "{}\u{0}{}\u{0}{}\u{0}",
        user_id.map(|u| u.to_string()).unwrap_or_default(),
        normalize_label(label),
        category
    )
}

impl PatternStore {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    /// Records one success or failure for the mapping and updates its
    /// confidence: `c += (1-c)*0.3` on success, `c *= 0.5` on failure.
    pub fn record(
        &self,
        user_id: Option<Uuid>,
        label: &str,
        category: &str,
        profile_field: &str,
        success: bool,
    ) -> Result<LearnedPattern> {
        let k = key(user_id, label, category, profile_field);
        let mut pattern = self
            .store
            .get_json::<LearnedPattern>(TREE, &k)?
            .unwrap_or(LearnedPattern {
                label_normalized: normalize_label(label),
                field_category: category.to_string(),
                profile_field: profile_field.to_string(),
                confidence: INITIAL_CONFIDENCE,
                success_count: 0,
                failure_count: 0,
                last_used_at: chrono::Utc::now(),
                user_id,
            });

        if success {
            pattern.confidence += (1.0 - pattern.confidence) * ALPHA_SUCCESS;
            pattern.success_count += 1;
        } else {
            pattern.confidence *= 1.0 - ALPHA_FAILURE;
            pattern.failure_count += 1;
        }
        pattern.last_used_at = chrono::Utc::now();

        self.store.put_json(TREE, &k, &pattern, None)?;
        debug!(
            target: "jobflow::patterns",
            label = %pattern.label_normalized,
            field = %pattern.profile_field,
            confidence = pattern.confidence,
            success,
            "pattern recorded"
        );
        Ok(pattern)
    }

    /// Highest-confidence mapping for `(label, category)` with confidence at
    /// or above the lookup threshold.
    pub fn lookup(&self, user_id: Option<Uuid>, label: &str, category: &str) -> Result<Option<LearnedPattern>> {
        let prefix = lookup_prefix(user_id, label, category);
        let mut best: Option<LearnedPattern> = None;
        for (_, pattern) in self.store.scan_json::<LearnedPattern>(TREE, &prefix)? {
            if pattern.confidence < LOOKUP_THRESHOLD {
                continue;
            }
            if best.as_ref().map(|b| pattern.confidence > b.confidence).unwrap_or(true) {
                best = Some(pattern);
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PatternStore {
        PatternStore::new(Arc::new(KvStore::open_temporary().unwrap()))
    }

    #[test]
    fn first_success_clears_lookup_threshold() {
        let s = store();
        let p = s.record(None, "Preferred  Pronouns *", "dropdown", "gender", true).unwrap();
        assert!(p.confidence >= LOOKUP_THRESHOLD);
        // Normalization: whitespace collapsed, trailing `*` stripped.
        let found = s.lookup(None, "preferred pronouns", "dropdown").unwrap().unwrap();
        assert_eq!(found.profile_field, "gender");
    }

    #[test]
    fn failures_decay_below_threshold() {
        let s = store();
        s.record(None, "pronouns", "dropdown", "gender", true).unwrap();
        s.record(None, "pronouns", "dropdown", "gender", false).unwrap();
        assert!(s.lookup(None, "pronouns", "dropdown").unwrap().is_none());
    }

    #[test]
    fn per_user_rows_are_isolated() {
        let s = store();
        let u1 = Uuid::new_v4();
        s.record(Some(u1), "pronouns", "dropdown", "gender", true).unwrap();
        assert!(s.lookup(Some(u1), "pronouns", "dropdown").unwrap().is_some());
        assert!(s.lookup(Some(Uuid::new_v4()), "pronouns", "dropdown").unwrap().is_none());
    }

    #[test]
    fn best_confidence_wins() {
        let s = store();
        s.record(None, "city", "text_input", "preferred_locations", true).unwrap();
        s.record(None, "city", "text_input", "city", true).unwrap();
        s.record(None, "city", "text_input", "city", true).unwrap();
        let found = s.lookup(None, "city", "text_input").unwrap().unwrap();
        assert_eq!(found.profile_field, "city");
    }
}
