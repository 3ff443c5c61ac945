//! # Cache Sync
//!
//! Tiered caching for request-serving processes, with write-back and
//! heartbeat refresh driven by distributed expiration markers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Local: LocalCache                        │
//! │  • DashMap of per-entry locked values, TTL per entry       │
//! │  • Refresh-on-timeout entries, size-bounded recycle pass   │
//! │  • CacheOps namespaces: meta::, {type}::, table_           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Distributed: Redis                          │
//! │  • Data + KeyInfo rows                                     │
//! │  • Expiration markers {prefix}::{type}:{id}::{trace_id}    │
//! │  • Per-firing locks, expired-key notifications             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              (ExpireOps: write back on X / +X,
//!               reload on -X)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Durable: RelationalStore                   │
//! │  • Source of truth, host supplied                          │
//! │  • Optional named write-back targets                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cache_sync::storage::memory::{MemoryRelationalStore, MemoryTableMetadata};
//! use cache_sync::{CacheSyncConfig, CacheSyncRuntime, KeyInfo, KvIdType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheSyncConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let mut runtime = CacheSyncRuntime::connect(
//!         config,
//!         Arc::new(MemoryRelationalStore::new()),
//!         Arc::new(MemoryTableMetadata::new()),
//!     )
//!     .await
//!     .expect("Failed to connect");
//!     runtime.start();
//!
//!     // Write the user back to the database 30s from now
//!     let ops = runtime.expire_ops();
//!     let mut info = KeyInfo::new("users", "30").mark_new();
//!     ops.set_expire_key(&ops.new_context(), &KvIdType::new("42", "user"), &mut info)
//!         .await
//!         .expect("Failed to arm marker");
//!
//!     runtime.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`local_cache`]: bounded, refreshable in-process cache and its recycler
//! - [`cache_ops`]: metadata/data/table namespaces over the local cache
//! - [`expire`]: markers, expiration locks, write-back and refresh
//! - [`storage`]: collaborator traits, Redis adapter, in-memory doubles
//! - [`runtime`]: starts and stops the background loops
//! - [`resilience`]: retry policies

pub mod cache_ops;
pub mod config;
pub mod context;
pub mod expire;
pub mod local_cache;
pub mod metrics;
pub mod model;
pub mod resilience;
pub mod runtime;
pub mod storage;

pub use cache_ops::{CacheOps, CachedTableMetadata};
pub use config::CacheSyncConfig;
pub use context::{Context, RecordingSink, TraceSink, TracingSink};
pub use expire::{EventOutcome, ExpirationListener, ExpireError, ExpireOps, KeyCodec, Stores};
pub use local_cache::{CacheRecycler, LocalCache, LocalCacheError, RecycleReport, RefreshFn};
pub use model::{AnyKey, ExpireSpec, ExpireSpecError, KeyInfo, KvIdType, KvPair, KvPairs, ValueMap};
pub use resilience::retry::RetryConfig;
pub use runtime::{CacheSyncRuntime, RuntimeState};
pub use storage::traits::{
    DistributedCacheStore, ExpirationFeed, KeyInfoStore, MarkerOutcome, RelationalStore,
    StorageError, TableMetadata,
};
