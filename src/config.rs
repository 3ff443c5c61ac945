//! Configuration for the cache sync layer.
//!
//! # Example
//!
//! ```
//! use cache_sync::CacheSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CacheSyncConfig::default();
//! assert_eq!(config.max_cache_size, 1024);
//! assert_eq!(config.local_max_ttl_secs(), 180);
//!
//! // Full config
//! let config = CacheSyncConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     max_cache_size: 10_000,
//!     cache_recycle_secs: 60,
//!     event_prefix: "orders".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.event_prefix(), "orders");
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the cache sync layer.
///
/// All fields have defaults. `redis_url` is only read by the Redis adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSyncConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// LocalCache entry bound; the sweep trims back to 3/4 of this
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,

    /// Seconds between recycle passes
    #[serde(default = "default_cache_recycle_secs")]
    pub cache_recycle_secs: u64,

    /// Metadata TTL floor in seconds (<= 0 disables metadata caching)
    #[serde(default = "default_key_min_cache_ttl")]
    pub key_min_cache_ttl: i64,

    /// Data TTL ceiling in seconds (<= 0 disables data caching)
    #[serde(default = "default_data_max_cache_ttl")]
    pub data_max_cache_ttl: i64,

    /// TTL for cached table metadata
    #[serde(default = "default_table_info_cache_ttl")]
    pub table_info_cache_ttl: i64,

    /// Marker / notification prefix
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,

    /// Distributed data key prefix
    #[serde(default = "default_hdata_prefix")]
    pub hdata_prefix: String,

    /// Distributed KeyInfo hash prefix
    #[serde(default = "default_hkey_prefix")]
    pub hkey_prefix: String,

    /// Expiration lock TTL in seconds
    #[serde(default = "default_event_lock_timeout")]
    pub event_lock_timeout: u64,

    /// Per-context stopwatches
    #[serde(default)]
    pub enable_monitor: bool,

    /// Fixed delay before the listener resubscribes
    #[serde(default = "default_listener_retry_ms")]
    pub listener_retry_ms: u64,
}

fn default_max_cache_size() -> usize { 1024 }
fn default_cache_recycle_secs() -> u64 { 300 }
fn default_key_min_cache_ttl() -> i64 { 180 }
fn default_data_max_cache_ttl() -> i64 { 60 }
fn default_table_info_cache_ttl() -> i64 { 3600 }
fn default_event_prefix() -> String { "event".to_string() }
fn default_hdata_prefix() -> String { "hdata".to_string() }
fn default_hkey_prefix() -> String { "hkey".to_string() }
fn default_event_lock_timeout() -> u64 { 60 }
fn default_listener_retry_ms() -> u64 { 5000 }

impl Default for CacheSyncConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            max_cache_size: default_max_cache_size(),
            cache_recycle_secs: default_cache_recycle_secs(),
            key_min_cache_ttl: default_key_min_cache_ttl(),
            data_max_cache_ttl: default_data_max_cache_ttl(),
            table_info_cache_ttl: default_table_info_cache_ttl(),
            event_prefix: default_event_prefix(),
            hdata_prefix: default_hdata_prefix(),
            hkey_prefix: default_hkey_prefix(),
            event_lock_timeout: default_event_lock_timeout(),
            enable_monitor: false,
            listener_retry_ms: default_listener_retry_ms(),
        }
    }
}

impl CacheSyncConfig {
    /// Event prefix with any `::` removed, so it never collides with the
    /// key separator.
    pub fn event_prefix(&self) -> String {
        self.event_prefix.replace("::", "")
    }

    /// Per-entry TTL ceiling for the LocalCache.
    pub fn local_max_ttl_secs(&self) -> u64 {
        self.key_min_cache_ttl.max(self.data_max_cache_ttl).max(0) as u64
    }

    pub fn recycle_interval(&self) -> Duration {
        Duration::from_secs(self.cache_recycle_secs.max(1))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.event_lock_timeout.max(1))
    }

    pub fn listener_retry_delay(&self) -> Duration {
        Duration::from_millis(self.listener_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheSyncConfig::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.cache_recycle_secs, 300);
        assert_eq!(config.key_min_cache_ttl, 180);
        assert_eq!(config.data_max_cache_ttl, 60);
        assert_eq!(config.event_lock_timeout, 60);
        assert_eq!(config.event_prefix(), "event");
        assert!(!config.enable_monitor);
        assert_eq!(config.listener_retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheSyncConfig =
            serde_json::from_str(r#"{"max_cache_size": 10, "event_prefix": "ev::"}"#).unwrap();
        assert_eq!(config.max_cache_size, 10);
        assert_eq!(config.event_prefix(), "ev");
        assert_eq!(config.hdata_prefix, "hdata");
    }

    #[test]
    fn test_local_max_ttl() {
        let config = CacheSyncConfig {
            key_min_cache_ttl: 10,
            data_max_cache_ttl: 600,
            ..Default::default()
        };
        assert_eq!(config.local_max_ttl_secs(), 600);

        let disabled = CacheSyncConfig {
            key_min_cache_ttl: -1,
            data_max_cache_ttl: 0,
            ..Default::default()
        };
        assert_eq!(disabled.local_max_ttl_secs(), 0);
    }

    #[test]
    fn test_durations_never_zero() {
        let config = CacheSyncConfig {
            cache_recycle_secs: 0,
            event_lock_timeout: 0,
            ..Default::default()
        };
        assert_eq!(config.recycle_interval(), Duration::from_secs(1));
        assert_eq!(config.lock_timeout(), Duration::from_secs(1));
    }
}
