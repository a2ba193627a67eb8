//! Layered rate limiting over shared external resources.
//!
//! Fixed-window counters keyed by `(limit-name, scope-key)` plus bounded
//! "concurrent" limits that behave as semaphores (callers must `release`).
//! Counters live in the KV store so every worker sees the same state.
//!
//! Failure policy: user-scope limits fail closed (a broken store must not
//! grant unlimited quota), global observability counters fail open.

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::store::{now_ms, KvStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const COUNTER_TREE: &str = "rate_counters";
const SLOT_TREE: &str = "rate_slots";

/// Scope of a limit: one counter per user, one global counter, or a bounded
/// concurrency slot per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    User,
    Global,
    Concurrent,
}

/// A named limit definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub name: String,
    /// Window length; unused for concurrent limits.
    pub window_seconds: u64,
    pub max_count: u64,
    pub scope: LimitScope,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitDecision {
    pub allowed: bool,
    pub used: u64,
    pub max: u64,
    /// Seconds until the current window ends; set when denied on a windowed
    /// limit.
    pub retry_after_secs: Option<i64>,
}

/// Snapshot of one user-scope limit for the account dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitUsage {
    pub name: String,
    pub used: u64,
    pub max: u64,
    pub window_remaining_secs: i64,
}

/// Token-bucket / fixed-window rate limiter over the shared store.
pub struct RateLimiter {
    store: Arc<KvStore>,
    limits: HashMap<String, RateLimitConfig>,
}

impl RateLimiter {
    /// Limiter with the platform's predefined limits.
    pub fn new(store: Arc<KvStore>, config: &CoreConfig) -> Self {
        let defs = [
            RateLimitConfig {
                name: "resume_tailoring_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: config.resume_tailoring_per_day,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "job_applications_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: config.applications_per_day,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "job_search_per_user_per_day".into(),
                window_seconds: 86_400,
                max_count: config.job_search_per_day,
                scope: LimitScope::User,
            },
            RateLimitConfig {
                name: "concurrent_job_applications".into(),
                window_seconds: 0,
                max_count: config.concurrent_applications,
                scope: LimitScope::Concurrent,
            },
            RateLimitConfig {
                name: "gemini_requests_per_minute".into(),
                window_seconds: 60,
                max_count: config.gemini_requests_per_minute,
                scope: LimitScope::Global,
            },
            RateLimitConfig {
                name: "gemini_requests_per_day".into(),
                window_seconds: 86_400,
                max_count: config.gemini_requests_per_day,
                scope: LimitScope::Global,
            },
        ];
        Self::with_limits(store, defs)
    }

    /// Limiter with an explicit limit set (tests, extensions).
    pub fn with_limits(store: Arc<KvStore>, defs: impl IntoIterator<Item = RateLimitConfig>) -> Self {
        let limits = defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self { store, limits }
    }

    pub fn limit(&self, name: &str) -> Option<&RateLimitConfig> {
        self.limits.get(name)
    }

    fn counter_key(name: &str, scope_key: &str) -> String {
        format!("{}:{}", name, scope_key)
    }

    /// Atomically counts this request against `(name, scope_key)` and decides
    /// admission. Concurrent-scope limits take a slot the caller must later
    /// `release`.
    pub fn check_limit(&self, name: &str, scope_key: &str) -> Result<LimitDecision> {
        let def = self
            .limits
            .get(name)
            .ok_or_else(|| CoreError::Config(format!("unknown rate limit: {}", name)))?;
        let key = Self::counter_key(name, scope_key);

        match def.scope {
            LimitScope::Concurrent => {
                let acquired = self.store.try_acquire_slot(SLOT_TREE, &key, def.max_count)?;
                let used = self.store.slot_holders(SLOT_TREE, &key)?;
                Ok(LimitDecision {
                    allowed: acquired,
                    used,
                    max: def.max_count,
                    retry_after_secs: None,
                })
            }
            LimitScope::User | LimitScope::Global => {
                let state = match self.store.incr_window(COUNTER_TREE, &key, def.window_seconds) {
                    Ok(state) => state,
                    Err(e) if def.scope == LimitScope::Global => {
                        // Observability counter: degrade open.
                        warn!(target: "jobflow::ratelimit", limit = name, error = %e, "counter store failed; allowing");
                        return Ok(LimitDecision {
                            allowed: true,
                            used: 0,
                            max: def.max_count,
                            retry_after_secs: None,
                        });
                    }
                    // User-scope limits fail closed.
                    Err(e) => return Err(e),
                };
                let allowed = state.count <= def.max_count;
                let retry_after = if allowed {
                    None
                } else {
                    Some(((state.window_end_ms(def.window_seconds) - now_ms()) / 1000).max(1))
                };
                Ok(LimitDecision {
                    allowed,
                    used: state.count.min(def.max_count),
                    max: def.max_count,
                    retry_after_secs: retry_after,
                })
            }
        }
    }

    /// Records consumption without an admission decision. Used after the
    /// expensive work succeeded when admission was checked separately.
    pub fn increment_usage(&self, name: &str, scope_key: &str) -> Result<()> {
        let def = self
            .limits
            .get(name)
            .ok_or_else(|| CoreError::Config(format!("unknown rate limit: {}", name)))?;
        let key = Self::counter_key(name, scope_key);
        if let Err(e) = self.store.incr_window(COUNTER_TREE, &key, def.window_seconds.max(1)) {
            if def.scope == LimitScope::Global {
                warn!(target: "jobflow::ratelimit", limit = name, error = %e, "usage increment lost");
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Releases a concurrent-scope slot taken by `check_limit`.
    pub fn release(&self, name: &str, scope_key: &str) -> Result<()> {
        let key = Self::counter_key(name, scope_key);
        self.store.release_slot(SLOT_TREE, &key)
    }

    /// Usage snapshot for every user-scope limit, without incrementing.
    pub fn get_user_limits(&self, user_id: &str) -> Result<Vec<LimitUsage>> {
        let mut out = Vec::new();
        for def in self.limits.values() {
            if def.scope != LimitScope::User {
                continue;
            }
            let key = Self::counter_key(&def.name, user_id);
            let state = self.store.read_window(COUNTER_TREE, &key, def.window_seconds)?;
            out.push(LimitUsage {
                name: def.name.clone(),
                used: state.count.min(def.max_count),
                max: def.max_count,
                window_remaining_secs: ((state.window_end_ms(def.window_seconds) - now_ms()) / 1000).max(0),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Maps a denial into the error handlers surface to users.
    pub fn deny_error(name: &str, decision: &LimitDecision) -> CoreError {
        CoreError::LimitDenied {
            name: name.to_string(),
            retry_after_secs: decision.retry_after_secs.unwrap_or(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(defs: Vec<RateLimitConfig>) -> RateLimiter {
        RateLimiter::with_limits(Arc::new(KvStore::open_temporary().unwrap()), defs)
    }

    fn window_def(name: &str, window: u64, max: u64, scope: LimitScope) -> RateLimitConfig {
        RateLimitConfig {
            name: name.into(),
            window_seconds: window,
            max_count: max,
            scope,
        }
    }

    #[test]
    fn windowed_limit_denies_past_max_with_retry_after() {
        let rl = limiter(vec![window_def("searches", 60, 2, LimitScope::User)]);
        assert!(rl.check_limit("searches", "u1").unwrap().allowed);
        assert!(rl.check_limit("searches", "u1").unwrap().allowed);
        let denied = rl.check_limit("searches", "u1").unwrap();
        assert!(!denied.allowed);
        let retry = denied.retry_after_secs.unwrap();
        assert!(retry >= 1 && retry <= 60);
        // Separate scope key has its own counter.
        assert!(rl.check_limit("searches", "u2").unwrap().allowed);
    }

    #[test]
    fn window_rolls_over() {
        let rl = limiter(vec![window_def("fast", 1, 1, LimitScope::User)]);
        assert!(rl.check_limit("fast", "u1").unwrap().allowed);
        assert!(!rl.check_limit("fast", "u1").unwrap().allowed);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(rl.check_limit("fast", "u1").unwrap().allowed);
    }

    #[test]
    fn concurrent_limit_is_a_semaphore() {
        let rl = limiter(vec![window_def("sessions", 0, 2, LimitScope::Concurrent)]);
        assert!(rl.check_limit("sessions", "u1").unwrap().allowed);
        assert!(rl.check_limit("sessions", "u1").unwrap().allowed);
        assert!(!rl.check_limit("sessions", "u1").unwrap().allowed);
        rl.release("sessions", "u1").unwrap();
        assert!(rl.check_limit("sessions", "u1").unwrap().allowed);
    }

    #[test]
    fn user_snapshot_reports_usage_without_incrementing() {
        let rl = limiter(vec![window_def("searches", 60, 5, LimitScope::User)]);
        rl.check_limit("searches", "u1").unwrap();
        rl.check_limit("searches", "u1").unwrap();
        let usage = rl.get_user_limits("u1").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].used, 2);
        assert_eq!(usage[0].max, 5);
        // Snapshot twice; unchanged.
        let usage = rl.get_user_limits("u1").unwrap();
        assert_eq!(usage[0].used, 2);
    }

    #[test]
    fn unknown_limit_is_a_config_error() {
        let rl = limiter(vec![]);
        assert!(matches!(rl.check_limit("nope", "u1"), Err(CoreError::Config(_))));
    }
}
