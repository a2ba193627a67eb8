//! Security-audit event log. Every job handler emits one event per
//! execution (success or failure); events are queryable per user and expire
//! after 30 days.

use crate::error::Result;
use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TREE: &str = "audit_events";
const RETENTION: Duration = Duration::from_secs(30 * 86_400);

/// Event types emitted by the core.
pub mod event_type {
    pub const DATA_ACCESS: &str = "data_access";
    pub const API_ABUSE: &str = "api_abuse";
    pub const BACKUP: &str = "backup";
}

/// One audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub duration_seconds: f64,
    pub detail: serde_json::Value,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only audit log over the shared store.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<KvStore>,
}

impl AuditLog {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    pub fn record(
        &self,
        event_type: &str,
        user_id: Option<Uuid>,
        action: &str,
        duration_seconds: f64,
        detail: serde_json::Value,
    ) -> Result<()> {
        let event = AuditEvent {
            event_type: event_type.to_string(),
            user_id,
            action: action.to_string(),
            duration_seconds,
            detail,
            recorded_at: chrono::Utc::now(),
        };
        // Key orders by user then time so per-user scans are a prefix read.
        let key = format!(
            "{}\u{0}{:020}\u{0}{}",
            user_id.map(|u| u.to_string()).unwrap_or_default(),
            event.recorded_at.timestamp_millis(),
            Uuid::new_v4()
        );
        self.store.put_json(TREE, &key, &event, Some(RETENTION))?;
        tracing::info!(
            target: "jobflow::audit",
            event_type,
            user_id = ?user_id,
            action,
            duration_seconds,
            "audit event"
        );
        Ok(())
    }

    /// Events for one user, oldest first.
    pub fn events_for_user(&self, user_id: Uuid) -> Result<Vec<AuditEvent>> {
        let prefix = format!("{}\u{0}", user_id);
        Ok(self
            .store
            .scan_json::<AuditEvent>(TREE, &prefix)?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_scan_per_user_in_order() {
        let log = AuditLog::new(Arc::new(KvStore::open_temporary().unwrap()));
        let user = Uuid::new_v4();
        log.record(event_type::DATA_ACCESS, Some(user), "job_search", 1.5, serde_json::json!({}))
            .unwrap();
        log.record(event_type::API_ABUSE, Some(user), "job_search_failed", 0.1, serde_json::json!({}))
            .unwrap();
        log.record(event_type::DATA_ACCESS, Some(Uuid::new_v4()), "other", 0.0, serde_json::json!({}))
            .unwrap();

        let events = log.events_for_user(user).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "job_search");
        assert_eq!(events[1].action, "job_search_failed");
    }
}
