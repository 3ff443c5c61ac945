// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for cache-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `cache_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `namespace`: meta, data, table
//! - `outcome`: armed, kept, cleared / written_back, refreshed, contended, ...
//! - `kind`: stopwatch kind (redis, dbase, keyinfo)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// LOCAL CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Set current LocalCache entry count
pub fn set_local_cache_entries(count: usize) {
    gauge!("cache_sync_local_cache_entries").set(count as f64);
}

/// Record a local lookup
pub fn record_local_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "cache_sync_local_lookups_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the result of one recycle pass
pub fn record_recycle(expired: usize, refreshed: usize, refresh_failed: usize, reclaimed: usize) {
    counter!("cache_sync_recycle_passes_total").increment(1);
    counter!("cache_sync_recycle_evictions_total", "reason" => "expired").increment(expired as u64);
    counter!("cache_sync_recycle_evictions_total", "reason" => "refresh_failed")
        .increment(refresh_failed as u64);
    counter!("cache_sync_recycle_evictions_total", "reason" => "size").increment(reclaimed as u64);
    counter!("cache_sync_recycle_refreshes_total").increment(refreshed as u64);
}

/// Record recycle pass duration
pub fn record_recycle_duration(duration: Duration) {
    histogram!("cache_sync_recycle_seconds").record(duration.as_secs_f64());
}

/// Record a refresh function failure
pub fn record_refresh_failure() {
    counter!("cache_sync_refresh_failures_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// EXPIRATION PROTOCOL
// ═══════════════════════════════════════════════════════════════════════════

/// Record a marker set outcome (armed, kept, cleared)
pub fn record_marker(outcome: &str) {
    counter!(
        "cache_sync_markers_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an expire event outcome
pub fn record_expire_event(outcome: &str) {
    counter!(
        "cache_sync_expire_events_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record expire event handling duration
pub fn record_expire_latency(duration: Duration) {
    histogram!("cache_sync_expire_event_seconds").record(duration.as_secs_f64());
}

/// Record a lock release that found a foreign or missing signature
pub fn record_lock_lost() {
    counter!("cache_sync_lock_lost_total").increment(1);
}

/// Record a listener (re)subscription attempt
pub fn record_listener_reconnect(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cache_sync_listener_reconnects_total",
        "status" => status
    )
    .increment(1);
}

/// Set backend health status (1 = healthy, 0 = unhealthy)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "cache_sync_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// MONITOR - per-context stopwatches
// ═══════════════════════════════════════════════════════════════════════════

/// Record a stopwatch reading
pub fn record_stopwatch(kind: &str, action: &str, duration: Duration) {
    histogram!(
        "cache_sync_stopwatch_seconds",
        "kind" => kind.to_string(),
        "action" => action.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set runtime state (for monitoring state machine transitions)
pub fn set_runtime_state(state: &str) {
    counter!(
        "cache_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    kind: &'static str,
    action: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(kind: &'static str, action: &'static str) -> Self {
        Self {
            kind,
            action,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_stopwatch(self.kind, self.action, self.start.elapsed());
    }
}
