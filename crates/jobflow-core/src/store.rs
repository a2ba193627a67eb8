//! Sled-backed key-value store with the Redis-shaped primitives the core
//! needs: records with expiry, atomic fixed-window counters, bounded
//! concurrency slots, and a sorted queue tree.
//!
//! Expiry is cooperative: every record carries an optional `expires_at_ms`
//! and readers treat expired entries as absent (deleting them lazily). Any
//! store with atomic increment + TTL would do; sled keeps the platform
//! single-binary.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Wrapper persisted for every record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    expires_at_ms: Option<i64>,
    data: T,
}

/// Fixed-window counter state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u64,
    pub window_start_ms: i64,
}

impl WindowState {
    /// End of the current window in epoch milliseconds.
    pub fn window_end_ms(&self, window_secs: u64) -> i64 {
        self.window_start_ms + (window_secs as i64) * 1000
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotState {
    holders: u64,
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sled database handle shared by every subsystem. One tree per concern.
#[derive(Clone)]
pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    /// Opens (or creates) the store at `path`, e.g. `./data/jobflow`.
    pub fn open_path(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-process store backed by a temporary file. For tests.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Stores `value` under `tree/key`, optionally expiring after `ttl`.
    pub fn put_json<T: Serialize>(&self, tree: &str, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let env = Envelope {
            expires_at_ms: ttl.map(|d| now_ms() + d.as_millis() as i64),
            data: value,
        };
        let bytes = serde_json::to_vec(&env)?;
        self.tree(tree)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Reads `tree/key`; expired records are deleted and reported as absent.
    pub fn get_json<T: DeserializeOwned>(&self, tree: &str, key: &str) -> Result<Option<T>> {
        let t = self.tree(tree)?;
        let Some(bytes) = t.get(key.as_bytes())? else {
            return Ok(None);
        };
        let env: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(_) => {
                // Corrupt record: drop it rather than poisoning every reader.
                t.remove(key.as_bytes())?;
                return Ok(None);
            }
        };
        if let Some(exp) = env.expires_at_ms {
            if exp <= now_ms() {
                t.remove(key.as_bytes())?;
                return Ok(None);
            }
        }
        Ok(Some(env.data))
    }

    /// True when a live (non-expired) record exists.
    pub fn contains(&self, tree: &str, key: &str) -> Result<bool> {
        Ok(self.get_json::<serde_json::Value>(tree, key)?.is_some())
    }

    pub fn remove(&self, tree: &str, key: &str) -> Result<()> {
        self.tree(tree)?.remove(key.as_bytes())?;
        Ok(())
    }

    /// All live records under `prefix`, expired ones removed on the way.
    pub fn scan_json<T: DeserializeOwned>(&self, tree: &str, prefix: &str) -> Result<Vec<(String, T)>> {
        let t = self.tree(tree)?;
        let now = now_ms();
        let mut out = Vec::new();
        let mut dead = Vec::new();
        for item in t.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let Ok(env) = serde_json::from_slice::<Envelope<T>>(&bytes) else {
                dead.push(key);
                continue;
            };
            if matches!(env.expires_at_ms, Some(exp) if exp <= now) {
                dead.push(key);
                continue;
            }
            out.push((String::from_utf8_lossy(&key).into_owned(), env.data));
        }
        for key in dead {
            t.remove(key)?;
        }
        Ok(out)
    }

    /// Number of live records under `prefix`.
    pub fn count_prefix(&self, tree: &str, prefix: &str) -> Result<usize> {
        Ok(self.scan_json::<serde_json::Value>(tree, prefix)?.len())
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Atomically increments the fixed-window counter at `tree/key`. A new
    /// window starts whenever the previous one has elapsed.
    pub fn incr_window(&self, tree: &str, key: &str, window_secs: u64) -> Result<WindowState> {
        let t = self.tree(tree)?;
        let now = now_ms();
        let window_ms = (window_secs as i64) * 1000;
        let bytes = t.update_and_fetch(key.as_bytes(), |old| {
            let state = old
                .and_then(|b| serde_json::from_slice::<WindowState>(b).ok())
                .filter(|s| now < s.window_start_ms + window_ms)
                .map(|s| WindowState {
                    count: s.count + 1,
                    window_start_ms: s.window_start_ms,
                })
                .unwrap_or(WindowState {
                    count: 1,
                    window_start_ms: now,
                });
            serde_json::to_vec(&state).ok()
        })?;
        let bytes = bytes.ok_or_else(|| sled::Error::Unsupported("counter write lost".into()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Current window state without incrementing. A lapsed window reads as
    /// zero usage starting now.
    pub fn read_window(&self, tree: &str, key: &str, window_secs: u64) -> Result<WindowState> {
        let t = self.tree(tree)?;
        let now = now_ms();
        let window_ms = (window_secs as i64) * 1000;
        let state = t
            .get(key.as_bytes())?
            .and_then(|b| serde_json::from_slice::<WindowState>(&b).ok())
            .filter(|s| now < s.window_start_ms + window_ms)
            .unwrap_or(WindowState {
                count: 0,
                window_start_ms: now,
            });
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Bounded slots (concurrent-scope limits)
    // ------------------------------------------------------------------

    /// Takes one slot at `tree/key` if fewer than `max` are held.
    pub fn try_acquire_slot(&self, tree: &str, key: &str, max: u64) -> Result<bool> {
        let t = self.tree(tree)?;
        loop {
            let old = t.get(key.as_bytes())?;
            let holders = old
                .as_ref()
                .and_then(|b| serde_json::from_slice::<SlotState>(b).ok())
                .map(|s| s.holders)
                .unwrap_or(0);
            if holders >= max {
                return Ok(false);
            }
            let new = serde_json::to_vec(&SlotState { holders: holders + 1 })?;
            match t.compare_and_swap(key.as_bytes(), old, Some(new))? {
                Ok(()) => return Ok(true),
                Err(_) => continue,
            }
        }
    }

    /// Releases one slot. Releasing an empty key is a no-op.
    pub fn release_slot(&self, tree: &str, key: &str) -> Result<()> {
        let t = self.tree(tree)?;
        loop {
            let old = t.get(key.as_bytes())?;
            let holders = old
                .as_ref()
                .and_then(|b| serde_json::from_slice::<SlotState>(b).ok())
                .map(|s| s.holders)
                .unwrap_or(0);
            if holders == 0 {
                return Ok(());
            }
            let new = serde_json::to_vec(&SlotState { holders: holders - 1 })?;
            match t.compare_and_swap(key.as_bytes(), old, Some(new))? {
                Ok(()) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Current holder count at `tree/key`.
    pub fn slot_holders(&self, tree: &str, key: &str) -> Result<u64> {
        let t = self.tree(tree)?;
        Ok(t.get(key.as_bytes())?
            .and_then(|b| serde_json::from_slice::<SlotState>(&b).ok())
            .map(|s| s.holders)
            .unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Sorted queue (score-ordered, lowest first)
    // ------------------------------------------------------------------

    /// Pushes `member` with `score`. Keys sort as big-endian score then
    /// member, so iteration order is (score asc, member asc).
    pub fn queue_push(&self, tree: &str, score: u64, member: &str) -> Result<()> {
        let t = self.tree(tree)?;
        let mut key = score.to_be_bytes().to_vec();
        key.extend_from_slice(member.as_bytes());
        t.insert(key, member.as_bytes())?;
        Ok(())
    }

    /// Pops the lowest-scored member, if any.
    pub fn queue_pop_min(&self, tree: &str) -> Result<Option<(u64, String)>> {
        let t = self.tree(tree)?;
        loop {
            let Some((key, value)) = t.first()? else {
                return Ok(None);
            };
            match t.compare_and_swap(&key, Some(&value), None::<&[u8]>)? {
                Ok(()) => {
                    let mut score_bytes = [0u8; 8];
                    score_bytes.copy_from_slice(&key[..8]);
                    let score = u64::from_be_bytes(score_bytes);
                    return Ok(Some((score, String::from_utf8_lossy(&value).into_owned())));
                }
                Err(_) => continue,
            }
        }
    }

    /// Removes `member` wherever it sits in the queue. Returns whether a
    /// matching entry existed.
    pub fn queue_remove(&self, tree: &str, score: u64, member: &str) -> Result<bool> {
        let t = self.tree(tree)?;
        let mut key = score.to_be_bytes().to_vec();
        key.extend_from_slice(member.as_bytes());
        Ok(t.remove(key)?.is_some())
    }

    pub fn queue_len(&self, tree: &str) -> Result<usize> {
        Ok(self.tree(tree)?.len())
    }

    /// Flushes dirty pages to disk. Called on daemon shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_records_expire() {
        let store = KvStore::open_temporary().unwrap();
        store
            .put_json("t", "k", &"v".to_string(), Some(Duration::from_millis(0)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get_json::<String>("t", "k").unwrap(), None);

        store.put_json("t", "k2", &"v".to_string(), None).unwrap();
        assert_eq!(store.get_json::<String>("t", "k2").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn window_counter_rolls_over() {
        let store = KvStore::open_temporary().unwrap();
        let a = store.incr_window("c", "k", 1).unwrap();
        let b = store.incr_window("c", "k", 1).unwrap();
        assert_eq!(a.count, 1);
        assert_eq!(b.count, 2);
        assert_eq!(a.window_start_ms, b.window_start_ms);

        std::thread::sleep(Duration::from_millis(1100));
        let c = store.incr_window("c", "k", 1).unwrap();
        assert_eq!(c.count, 1);
        assert!(c.window_start_ms > a.window_start_ms);
    }

    #[test]
    fn slots_bound_holders() {
        let store = KvStore::open_temporary().unwrap();
        assert!(store.try_acquire_slot("s", "u1", 2).unwrap());
        assert!(store.try_acquire_slot("s", "u1", 2).unwrap());
        assert!(!store.try_acquire_slot("s", "u1", 2).unwrap());
        store.release_slot("s", "u1").unwrap();
        assert!(store.try_acquire_slot("s", "u1", 2).unwrap());
    }

    #[test]
    fn queue_orders_by_score_then_member() {
        let store = KvStore::open_temporary().unwrap();
        store.queue_push("q", 3_000_100, "c").unwrap();
        store.queue_push("q", 1_000_100, "a").unwrap();
        store.queue_push("q", 1_000_100, "b").unwrap();

        assert_eq!(store.queue_pop_min("q").unwrap(), Some((1_000_100, "a".into())));
        assert_eq!(store.queue_pop_min("q").unwrap(), Some((1_000_100, "b".into())));
        assert_eq!(store.queue_pop_min("q").unwrap(), Some((3_000_100, "c".into())));
        assert_eq!(store.queue_pop_min("q").unwrap(), None);
    }
}
