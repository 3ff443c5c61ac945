//! A single cached value and its bookkeeping.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::ValueMap;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Produces a fresh value for a self-refreshing entry.
pub type RefreshFn = Arc<dyn Fn() -> Result<ValueMap, BoxError> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct EntryState {
    pub value: ValueMap,
    pub created_at: Instant,
    pub ttl: Duration,
    pub last_access: Instant,
    /// Tie-breaker for entries touched within the same clock tick.
    pub access_seq: u64,
}

impl EntryState {
    pub fn new(value: ValueMap, ttl: Duration, seq: u64) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            ttl,
            last_access: now,
            access_seq: seq,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_timed_out(&self) -> bool {
        self.elapsed() >= self.ttl
    }

    /// At least 3/4 of the TTL has passed. Compared in nanoseconds so an
    /// unbounded TTL cannot overflow.
    pub fn is_due_for_refresh(&self) -> bool {
        self.elapsed().as_nanos() * 4 >= self.ttl.as_nanos() * 3
    }

    pub fn touch(&mut self, seq: u64) {
        self.last_access = Instant::now();
        self.access_seq = seq;
    }
}

pub(crate) struct CachedEntry {
    pub state: Mutex<EntryState>,
    pub refresher: Option<RefreshFn>,
}

impl CachedEntry {
    pub fn new(state: EntryState, refresher: Option<RefreshFn>) -> Self {
        Self {
            state: Mutex::new(state),
            refresher,
        }
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresher.is_some()
    }
}

impl std::fmt::Debug for CachedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEntry")
            .field("state", &*self.state.lock())
            .field("refreshable", &self.is_refreshable())
            .finish()
    }
}
