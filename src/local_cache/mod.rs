// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, TTL-based, refreshable in-process cache.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ LocalCache                                               │
//! │   DashMap<key, Arc<CachedEntry>>                         │
//! │     └─ Mutex<EntryState>  value · created · ttl · access │
//! │     └─ Option<RefreshFn>                                 │
//! ├──────────────────────────────────────────────────────────┤
//! │ recycle()  one sweep pass (expire · refresh · reclaim)   │
//! │ CacheRecycler  tokio interval driving recycle()          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Foreground calls only hold a map shard long enough to clone the entry's
//! `Arc`; all reads and mutations then happen under that entry's own mutex.
//! The size bound is enforced by the sweep, never by `put`.

mod entry;
mod recycler;

pub use entry::{BoxError, RefreshFn};
pub use recycler::CacheRecycler;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::metrics;
use crate::model::ValueMap;
use entry::{CachedEntry, EntryState};

#[derive(Error, Debug)]
pub enum LocalCacheError {
    #[error("refresh failed for '{key}': {reason}")]
    RefreshFailed { key: String, reason: String },
}

/// What one recycle pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecycleReport {
    pub expired: usize,
    pub refreshed: usize,
    pub refresh_failed: usize,
    pub reclaimed: usize,
    pub remaining: usize,
}

pub struct LocalCache {
    entries: DashMap<String, Arc<CachedEntry>>,
    max_size: usize,
    max_ttl: Duration,
    access_clock: AtomicU64,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("len", &self.entries.len())
            .field("max_size", &self.max_size)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl LocalCache {
    pub fn new(max_size: usize, max_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            max_ttl,
            access_clock: AtomicU64::new(0),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live size the sweep trims back to.
    pub fn reclaim_threshold(&self) -> usize {
        self.max_size * 3 / 4
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    fn cap(&self, ttl: Option<Duration>) -> Duration {
        ttl.map_or(self.max_ttl, |t| t.min(self.max_ttl))
    }

    fn entry(&self, key: &str) -> Option<Arc<CachedEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Drop `key` only if it still maps to `entry`.
    fn evict(&self, key: &str, entry: &Arc<CachedEntry>) -> bool {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Install a plain entry. `ttl` defaults to and is capped at the maximum.
    pub fn put(&self, key: impl Into<String>, value: ValueMap, ttl: Option<Duration>) {
        let state = EntryState::new(value, self.cap(ttl), self.tick());
        self.entries
            .insert(key.into(), Arc::new(CachedEntry::new(state, None)));
    }

    /// Install a self-refreshing entry, loading its first value now.
    ///
    /// The TTL is kept as given: it sets the refresh cadence rather than a
    /// staleness bound, so the cache maximum does not apply.
    pub fn put_refreshable(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        refresher: RefreshFn,
    ) -> Result<ValueMap, LocalCacheError> {
        let key = key.into();
        let value = (refresher)().map_err(|e| LocalCacheError::RefreshFailed {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let state = EntryState::new(value.clone(), ttl, self.tick());
        self.entries
            .insert(key, Arc::new(CachedEntry::new(state, Some(refresher))));
        Ok(value)
    }

    /// Bring `state` up to date. Returns false when the entry must go.
    fn revive(&self, key: &str, entry: &CachedEntry, state: &mut EntryState) -> bool {
        if !state.is_timed_out() {
            return true;
        }
        match entry.refresher {
            None => false,
            Some(ref refresher) => match refresher() {
                Ok(value) => {
                    *state = EntryState::new(value, state.ttl, self.tick());
                    true
                }
                Err(e) => {
                    metrics::record_refresh_failure();
                    error!(key = %key, error = %e, "Cache refresh failed, evicting");
                    false
                }
            },
        }
    }

    pub fn get(&self, key: &str) -> Option<ValueMap> {
        let Some(entry) = self.entry(key) else {
            metrics::record_local_lookup(false);
            return None;
        };
        let value = {
            let mut state = entry.state.lock();
            if self.revive(key, &entry, &mut state) {
                state.touch(self.tick());
                Some(state.value.clone())
            } else {
                None
            }
        };
        if value.is_none() {
            self.evict(key, &entry);
        }
        metrics::record_local_lookup(value.is_some());
        value
    }

    /// Stored value regardless of expiry. Never refreshes or evicts.
    pub fn get_without_timeout(&self, key: &str) -> Option<ValueMap> {
        self.entry(key).map(|e| e.state.lock().value.clone())
    }

    /// Merge `partial` into the live value. False when the key is gone.
    pub fn update(&self, key: &str, partial: ValueMap) -> bool {
        let Some(entry) = self.entry(key) else {
            return false;
        };
        let alive = {
            let mut state = entry.state.lock();
            if self.revive(key, &entry, &mut state) {
                state.value.extend(partial);
                state.touch(self.tick());
                true
            } else {
                false
            }
        };
        if !alive {
            self.evict(key, &entry);
        }
        alive
    }

    /// Whether `key` holds a live entry. A timed-out plain entry is evicted
    /// and reported absent; refreshable entries count as present.
    pub fn contains_key(&self, key: &str) -> bool {
        let Some(entry) = self.entry(key) else {
            return false;
        };
        let dead = !entry.is_refreshable() && entry.state.lock().is_timed_out();
        if dead {
            self.evict(key, &entry);
        }
        !dead
    }

    pub fn remove(&self, key: &str) -> Option<ValueMap> {
        self.entries
            .remove(key)
            .map(|(_, e)| e.state.lock().value.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Live values for every key, through [`LocalCache::get`].
    pub fn list_all(&self) -> Vec<(String, ValueMap)> {
        self.list_where(|_| true)
    }

    pub fn list_prefixed(&self, prefix: &str) -> Vec<(String, ValueMap)> {
        self.list_where(|k| k.starts_with(prefix))
    }

    pub fn list_where(&self, filter: impl Fn(&str) -> bool) -> Vec<(String, ValueMap)> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| filter(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn remove_where(&self, filter: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !filter(k));
        before.saturating_sub(self.entries.len())
    }

    pub fn remove_all(&self) {
        self.entries.clear();
    }

    /// One sweep pass.
    ///
    /// Expired plain entries are evicted and refreshable entries past 3/4 of
    /// their TTL are reloaded. Everything else is a reclaim candidate, dropped
    /// oldest access first while the cache holds more than 3/4 of
    /// `max_size`.
    #[tracing::instrument(skip(self))]
    pub fn recycle(&self) -> RecycleReport {
        let started = Instant::now();
        let mut report = RecycleReport::default();

        let snapshot: Vec<(String, Arc<CachedEntry>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut expired = Vec::new();
        let mut due = Vec::new();
        let mut candidates = Vec::new();
        for (key, entry) in snapshot {
            let (timed_out, refresh_due, rank) = {
                let state = entry.state.lock();
                (
                    state.is_timed_out(),
                    state.is_due_for_refresh(),
                    (state.last_access, state.access_seq),
                )
            };
            if !entry.is_refreshable() && timed_out {
                expired.push((key, entry));
            } else if entry.is_refreshable() && refresh_due {
                due.push((key, entry));
            } else {
                candidates.push((rank, key, entry));
            }
        }

        for (key, entry) in expired {
            if self.evict(&key, &entry) {
                trace!(key = %key, "Recycled expired entry");
                report.expired += 1;
            }
        }

        for (key, entry) in due {
            let refreshed = match entry.refresher {
                Some(ref refresher) => refresher(),
                None => continue,
            };
            match refreshed {
                Ok(value) => {
                    let mut state = entry.state.lock();
                    *state = EntryState::new(value, state.ttl, self.tick());
                    trace!(key = %key, "Refreshed entry");
                    report.refreshed += 1;
                }
                Err(e) => {
                    metrics::record_refresh_failure();
                    error!(key = %key, error = %e, "Cache refresh failed, evicting");
                    if self.evict(&key, &entry) {
                        report.refresh_failed += 1;
                    }
                }
            }
        }

        let threshold = self.reclaim_threshold();
        if self.entries.len() > threshold {
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, key, entry) in candidates {
                if self.entries.len() <= threshold {
                    break;
                }
                if self.evict(&key, &entry) {
                    trace!(key = %key, "Reclaimed entry for size");
                    report.reclaimed += 1;
                }
            }
        }

        report.remaining = self.entries.len();
        debug!(
            expired = report.expired,
            refreshed = report.refreshed,
            refresh_failed = report.refresh_failed,
            reclaimed = report.reclaimed,
            remaining = report.remaining,
            "Recycle pass complete"
        );
        metrics::record_recycle(
            report.expired,
            report.refreshed,
            report.refresh_failed,
            report.reclaimed,
        );
        metrics::record_recycle_duration(started.elapsed());
        metrics::set_local_cache_entries(report.remaining);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    fn map(v: serde_json::Value) -> ValueMap {
        v.as_object().cloned().unwrap_or_default()
    }

    fn counting_refresher(counter: Arc<AtomicUsize>) -> RefreshFn {
        Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(map(json!({ "n": n })))
        })
    }

    fn failing_refresher() -> RefreshFn {
        Arc::new(|| Err("database unavailable".into()))
    }

    #[test]
    fn test_put_get() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", map(json!({"n": 1})), None);
        assert_eq!(cache.get("a").unwrap()["n"], json!(1));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_ttl_is_capped() {
        let cache = LocalCache::new(10, Duration::from_millis(20));
        cache.put("a", map(json!({"n": 1})), Some(Duration::from_secs(3600)));
        sleep(Duration::from_millis(30));
        assert!(cache.get("a").is_none());
        assert!(!cache.contains_key("a"));
    }

    #[test]
    fn test_plain_entry_lives_until_ttl() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", map(json!({"n": 1})), Some(Duration::from_millis(50)));
        assert!(cache.get("a").is_some());
        sleep(Duration::from_millis(60));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_put_refreshable_loads_immediately() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .put_refreshable("b", Duration::from_secs(1), counting_refresher(calls.clone()))
            .unwrap();
        assert_eq!(value["n"], json!(1));
        assert_eq!(cache.get("b").unwrap()["n"], json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_put_refreshable_failure_aborts_install() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let err = cache
            .put_refreshable("b", Duration::from_secs(1), failing_refresher())
            .unwrap_err();
        assert!(matches!(err, LocalCacheError::RefreshFailed { ref key, .. } if key == "b"));
        assert!(!cache.contains_key("b"));
    }

    #[test]
    fn test_expired_refreshable_get_refreshes() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("b", Duration::from_millis(20), counting_refresher(calls.clone()))
            .unwrap();
        sleep(Duration::from_millis(30));
        let value = cache.get("b").unwrap();
        assert_eq!(value["n"], json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_failure_on_get_evicts() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let refresher: RefreshFn = Arc::new(move || {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ValueMap::new())
            } else {
                Err("gone".into())
            }
        });
        cache
            .put_refreshable("b", Duration::from_millis(10), refresher)
            .unwrap();
        sleep(Duration::from_millis(20));
        assert!(cache.get("b").is_none());
        assert!(!cache.contains_key("b"));
    }

    #[test]
    fn test_update_merges() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", map(json!({"n": 1, "s": "x"})), None);
        assert!(cache.update("a", map(json!({"n": 2, "t": true}))));
        let value = cache.get("a").unwrap();
        assert_eq!(value["n"], json!(2));
        assert_eq!(value["s"], json!("x"));
        assert_eq!(value["t"], json!(true));
    }

    #[test]
    fn test_update_missing_or_expired() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        assert!(!cache.update("nope", ValueMap::new()));

        cache.put("a", ValueMap::new(), Some(Duration::from_millis(10)));
        sleep(Duration::from_millis(20));
        assert!(!cache.update("a", map(json!({"n": 1}))));
        assert!(!cache.contains_key("a"));
    }

    #[test]
    fn test_get_without_timeout_ignores_expiry() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", map(json!({"n": 1})), Some(Duration::from_millis(5)));
        sleep(Duration::from_millis(10));
        assert_eq!(cache.get_without_timeout("a").unwrap()["n"], json!(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_contains_key_evicts_expired_plain_entry() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", map(json!({"n": 1})), Some(Duration::from_millis(5)));
        assert!(cache.contains_key("a"));
        sleep(Duration::from_millis(10));
        assert!(!cache.contains_key("a"));
        assert!(cache.is_empty());
        assert!(cache.get_without_timeout("a").is_none());
    }

    #[test]
    fn test_contains_key_keeps_expired_refreshable_entry() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("r", Duration::from_millis(5), counting_refresher(calls.clone()))
            .unwrap();
        sleep(Duration::from_millis(10));
        assert!(cache.contains_key("r"));
        // presence check alone never reloads
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_on_timed_out_refreshable_refreshes_then_merges() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("r", Duration::from_millis(10), counting_refresher(calls.clone()))
            .unwrap();
        sleep(Duration::from_millis(20));

        assert!(cache.update("r", map(json!({"extra": true}))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let value = cache.get_without_timeout("r").unwrap();
        assert_eq!(value["n"], json!(2));
        assert_eq!(value["extra"], json!(true));
    }

    #[test]
    fn test_refreshable_ttl_not_capped_by_max() {
        let cache = LocalCache::new(10, Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("r", Duration::from_secs(60), counting_refresher(calls.clone()))
            .unwrap();
        for _ in 0..3 {
            assert_eq!(cache.get("r").unwrap()["n"], json!(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recycle_with_unbounded_ttl() {
        let cache = LocalCache::new(10, Duration::MAX);
        cache.put("k", ValueMap::new(), None);
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("r", Duration::MAX, counting_refresher(calls.clone()))
            .unwrap();

        let report = cache.recycle();
        assert_eq!(report, RecycleReport { remaining: 2, ..Default::default() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains_key("k"));
    }

    #[test]
    fn test_list_all_skips_dead_entries() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("live", map(json!({"n": 1})), None);
        cache.put("dead", map(json!({"n": 2})), Some(Duration::from_millis(5)));
        sleep(Duration::from_millis(10));
        let all = cache.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "live");
    }

    #[test]
    fn test_prefix_scan_and_removal() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("meta::a", ValueMap::new(), None);
        cache.put("meta::b", ValueMap::new(), None);
        cache.put("data::a", ValueMap::new(), None);
        assert_eq!(cache.list_prefixed("meta::").len(), 2);
        assert_eq!(cache.remove_where(|k| k.starts_with("meta::")), 2);
        assert_eq!(cache.keys(), vec!["data::a".to_string()]);
        cache.remove_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_recycle_evicts_expired() {
        let cache = LocalCache::new(100, Duration::from_secs(60));
        cache.put("old", ValueMap::new(), Some(Duration::from_millis(5)));
        cache.put("new", ValueMap::new(), None);
        sleep(Duration::from_millis(10));
        let report = cache.recycle();
        assert_eq!(report.expired, 1);
        assert_eq!(report.remaining, 1);
        assert!(cache.contains_key("new"));
    }

    #[test]
    fn test_recycle_refreshes_due_entries() {
        let cache = LocalCache::new(100, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .put_refreshable("r", Duration::from_millis(40), counting_refresher(calls.clone()))
            .unwrap();
        sleep(Duration::from_millis(35));
        let report = cache.recycle();
        assert_eq!(report.refreshed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_without_timeout("r").unwrap()["n"], json!(2));
    }

    #[test]
    fn test_recycle_refresh_failure_evicts_and_continues() {
        let cache = LocalCache::new(100, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let flaky: RefreshFn = Arc::new(move || {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ValueMap::new())
            } else {
                Err("boom".into())
            }
        });
        cache.put_refreshable("bad", Duration::from_millis(8), flaky).unwrap();
        cache.put("good", ValueMap::new(), None);
        sleep(Duration::from_millis(10));

        let report = cache.recycle();
        assert_eq!(report.refresh_failed, 1);
        assert!(!cache.contains_key("bad"));
        assert!(cache.contains_key("good"));
    }

    #[test]
    fn test_recycle_reclaims_oldest_accessed_first() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        for i in 0..12 {
            cache.put(format!("k{}", i), ValueMap::new(), None);
        }
        // touch the first four so they become the most recent
        for i in 0..4 {
            assert!(cache.get(&format!("k{}", i)).is_some());
        }

        let report = cache.recycle();
        assert_eq!(report.reclaimed, 6);
        assert_eq!(cache.len(), 6);
        for i in 0..4 {
            assert!(cache.contains_key(&format!("k{}", i)));
        }
        for i in 4..10 {
            assert!(!cache.contains_key(&format!("k{}", i)), "k{} should be reclaimed", i);
        }
        assert!(cache.contains_key("k10"));
        assert!(cache.contains_key("k11"));
    }

    #[test]
    fn test_recycle_mixed_pass() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        let due_calls = Arc::new(AtomicUsize::new(0));
        let idle_calls = Arc::new(AtomicUsize::new(0));

        cache.put("expired", ValueMap::new(), Some(Duration::from_millis(20)));
        cache
            .put_refreshable("due", Duration::from_millis(40), counting_refresher(due_calls.clone()))
            .unwrap();
        cache
            .put_refreshable("idle", Duration::from_secs(60), counting_refresher(idle_calls.clone()))
            .unwrap();
        for i in 0..7 {
            cache.put(format!("k{}", i), ValueMap::new(), None);
        }
        // k5 and k6 become the most recently used plain entries
        assert!(cache.get("k5").is_some());
        assert!(cache.get("k6").is_some());
        sleep(Duration::from_millis(35));

        // 10 entries: 1 expired, 1 due, 8 candidates; trim to 6
        let report = cache.recycle();
        assert_eq!(report.expired, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.refresh_failed, 0);
        assert_eq!(report.reclaimed, 3);
        assert_eq!(report.remaining, 6);

        assert_eq!(due_calls.load(Ordering::SeqCst), 2);
        assert_eq!(idle_calls.load(Ordering::SeqCst), 1);
        assert!(cache.get_without_timeout("expired").is_none());
        assert_eq!(cache.get_without_timeout("due").unwrap()["n"], json!(2));
        // the not-yet-due refreshable entry is the oldest access, so it is
        // the first reclaim candidate
        assert!(cache.get_without_timeout("idle").is_none());
        for i in 0..2 {
            assert!(cache.get_without_timeout(&format!("k{}", i)).is_none(), "k{} should be reclaimed", i);
        }
        for i in 2..7 {
            assert!(cache.get_without_timeout(&format!("k{}", i)).is_some(), "k{} should survive", i);
        }
    }

    #[test]
    fn test_recycle_under_threshold_keeps_everything() {
        let cache = LocalCache::new(100, Duration::from_secs(60));
        for i in 0..10 {
            cache.put(format!("k{}", i), ValueMap::new(), None);
        }
        let report = cache.recycle();
        assert_eq!(report, RecycleReport { remaining: 10, ..Default::default() });
    }

    #[test]
    fn test_replaced_entry_not_evicted_by_stale_handle() {
        let cache = LocalCache::new(10, Duration::from_secs(60));
        cache.put("a", ValueMap::new(), None);
        let stale = cache.entry("a").unwrap();
        cache.put("a", map(json!({"n": 2})), None);
        assert!(!cache.evict("a", &stale));
        assert_eq!(cache.get("a").unwrap()["n"], json!(2));
    }
}
