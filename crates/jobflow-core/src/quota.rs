//! Gemini quota manager: a reservation protocol over the global LLM budget.
//!
//! Admission counts live usage *plus* in-flight reservations against the
//! per-minute cap, so a burst of concurrent handlers cannot collectively
//! overshoot the provider quota. Reservations expire after 60 seconds and
//! are garbage-collected on every admission check, so a crashed handler can
//! never starve the budget permanently.

use crate::error::{CoreError, Result};
use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const RESERVATION_TREE: &str = "gemini_reservations";
const COUNTER_TREE: &str = "gemini_counters";
const MINUTE_KEY: &str = "requests_per_minute";
const DAY_KEY: &str = "requests_per_day";

/// How long a reservation may stay in flight before it is considered leaked.
pub const RESERVATION_TTL: Duration = Duration::from_secs(60);

/// Quota manager tunables.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub per_minute_cap: u64,
    pub per_day_cap: u64,
    /// Overcommit margin granted to priority 1-2 callers.
    pub headroom: u64,
    /// Window length of the per-minute counter. Shortened in tests.
    pub minute_window_secs: u64,
    pub day_window_secs: u64,
}

impl QuotaConfig {
    pub fn from_core(config: &crate::config::CoreConfig) -> Self {
        Self {
            per_minute_cap: config.gemini_requests_per_minute,
            per_day_cap: config.gemini_requests_per_day,
            headroom: config.quota_headroom,
            minute_window_secs: 60,
            day_window_secs: 86_400,
        }
    }
}

/// One in-flight claim on the per-minute budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaReservation {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub priority: u8,
    pub reserved_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Admission snapshot returned by `can_make_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub minute_used: u64,
    pub minute_reserved: u64,
    pub minute_cap: u64,
    pub day_used: u64,
    pub day_cap: u64,
    pub reason: Option<String>,
}

/// Reservation protocol over the global Gemini budget.
pub struct GeminiQuotaManager {
    store: Arc<KvStore>,
    config: QuotaConfig,
}

impl GeminiQuotaManager {
    pub fn new(store: Arc<KvStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    /// Live reservation count. Expired reservations are dropped here, which
    /// runs on every admission path.
    fn live_reservations(&self) -> Result<u64> {
        Ok(self.store.scan_json::<QuotaReservation>(RESERVATION_TREE, "")?.len() as u64)
    }

    fn snapshot(&self) -> Result<QuotaInfo> {
        let minute = self
            .store
            .read_window(COUNTER_TREE, MINUTE_KEY, self.config.minute_window_secs)?;
        let day = self.store.read_window(COUNTER_TREE, DAY_KEY, self.config.day_window_secs)?;
        Ok(QuotaInfo {
            minute_used: minute.count,
            minute_reserved: self.live_reservations()?,
            minute_cap: self.config.per_minute_cap,
            day_used: day.count,
            day_cap: self.config.per_day_cap,
            reason: None,
        })
    }

    /// True iff (live per-minute usage + live reservations) is under the
    /// per-minute cap AND daily usage is under the daily cap.
    pub fn can_make_request(&self) -> Result<(bool, QuotaInfo)> {
        let mut info = self.snapshot()?;
        if info.day_used >= info.day_cap {
            info.reason = Some("daily request budget exhausted".into());
            return Ok((false, info));
        }
        if info.minute_used + info.minute_reserved >= info.minute_cap {
            info.reason = Some("per-minute request budget exhausted".into());
            return Ok((false, info));
        }
        Ok((true, info))
    }

    /// Claims one slot of the per-minute budget. Priorities 1-2 may
    /// overcommit by the configured head-room; 3-5 may not.
    pub fn reserve_quota(&self, user_id: Uuid, priority: u8) -> Result<Uuid> {
        let info = self.snapshot()?;
        if info.day_used >= info.day_cap {
            return Err(CoreError::QuotaExceeded {
                reason: "daily request budget exhausted".into(),
            });
        }
        let cap = if priority <= 2 {
            self.config.per_minute_cap + self.config.headroom
        } else {
            self.config.per_minute_cap
        };
        if info.minute_used + info.minute_reserved + 1 > cap {
            return Err(CoreError::QuotaExceeded {
                reason: "per-minute request budget exhausted".into(),
            });
        }

        let now = chrono::Utc::now();
        let reservation = QuotaReservation {
            reservation_id: Uuid::new_v4(),
            user_id,
            priority,
            reserved_at: now,
            expires_at: now + chrono::Duration::from_std(RESERVATION_TTL).unwrap_or(chrono::Duration::seconds(60)),
        };
        self.store.put_json(
            RESERVATION_TREE,
            &reservation.reservation_id.to_string(),
            &reservation,
            Some(RESERVATION_TTL),
        )?;
        debug!(target: "jobflow::quota", reservation = %reservation.reservation_id, priority, "quota reserved");
        Ok(reservation.reservation_id)
    }

    /// Forgets the reservation and records the consumed request against the
    /// per-minute and per-day counters. Releasing an already-expired
    /// reservation still records consumption.
    pub fn release_quota(&self, reservation_id: Uuid) -> Result<()> {
        self.store.remove(RESERVATION_TREE, &reservation_id.to_string())?;
        self.store
            .incr_window(COUNTER_TREE, MINUTE_KEY, self.config.minute_window_secs)?;
        self.store.incr_window(COUNTER_TREE, DAY_KEY, self.config.day_window_secs)?;
        debug!(target: "jobflow::quota", reservation = %reservation_id, "quota released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(minute_cap: u64, minute_window_secs: u64) -> GeminiQuotaManager {
        GeminiQuotaManager::new(
            Arc::new(KvStore::open_temporary().unwrap()),
            QuotaConfig {
                per_minute_cap: minute_cap,
                per_day_cap: 1000,
                headroom: 2,
                minute_window_secs,
                day_window_secs: 86_400,
            },
        )
    }

    #[test]
    fn reserve_then_release_counts_usage() {
        let q = manager(10, 60);
        for _ in 0..3 {
            let id = q.reserve_quota(Uuid::new_v4(), 3).unwrap();
            q.release_quota(id).unwrap();
        }
        let (ok, info) = q.can_make_request().unwrap();
        assert!(ok);
        assert_eq!(info.minute_used, 3);
        assert_eq!(info.minute_reserved, 0);
    }

    #[test]
    fn reservations_count_toward_admission() {
        let q = manager(2, 60);
        let _a = q.reserve_quota(Uuid::new_v4(), 3).unwrap();
        let _b = q.reserve_quota(Uuid::new_v4(), 3).unwrap();
        let (ok, info) = q.can_make_request().unwrap();
        assert!(!ok);
        assert_eq!(info.minute_reserved, 2);
        assert!(matches!(
            q.reserve_quota(Uuid::new_v4(), 3),
            Err(CoreError::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn high_priority_gets_headroom() {
        let q = manager(1, 60);
        let _a = q.reserve_quota(Uuid::new_v4(), 3).unwrap();
        // Normal priority is over the cap.
        assert!(q.reserve_quota(Uuid::new_v4(), 3).is_err());
        // High priority may overcommit by the head-room margin.
        assert!(q.reserve_quota(Uuid::new_v4(), 1).is_ok());
    }

    #[test]
    fn counter_returns_to_zero_after_window() {
        let q = manager(10, 1);
        let id = q.reserve_quota(Uuid::new_v4(), 3).unwrap();
        q.release_quota(id).unwrap();
        assert_eq!(q.can_make_request().unwrap().1.minute_used, 1);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(q.can_make_request().unwrap().1.minute_used, 0);
    }
}
