// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-level wiring: the recycle scheduler and the expiration listener.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::cache_ops::{CacheOps, CachedTableMetadata};
use crate::config::CacheSyncConfig;
use crate::expire::{ExpirationListener, ExpireOps, ListenerHandle, Stores};
use crate::local_cache::CacheRecycler;
use crate::metrics;
use crate::resilience::retry::RetryConfig;
use crate::storage::redis::RedisStore;
use crate::storage::traits::{ExpirationFeed, RelationalStore, StorageError, TableMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

pub struct CacheSyncRuntime {
    config: CacheSyncConfig,
    cache_ops: Arc<CacheOps>,
    expire_ops: Arc<ExpireOps>,
    feed: Arc<dyn ExpirationFeed>,
    state: watch::Sender<RuntimeState>,
    recycler: Option<CacheRecycler>,
    listener: Option<ListenerHandle>,
}

impl CacheSyncRuntime {
    pub fn new(
        config: CacheSyncConfig,
        cache_ops: Arc<CacheOps>,
        expire_ops: Arc<ExpireOps>,
        feed: Arc<dyn ExpirationFeed>,
    ) -> Self {
        let (state, _) = watch::channel(RuntimeState::Created);
        Self {
            config,
            cache_ops,
            expire_ops,
            feed,
            state,
            recycler: None,
            listener: None,
        }
    }

    /// Connect to `config.redis_url` and wire every tier around it. The
    /// durable store and its table metadata come from the host.
    pub async fn connect(
        config: CacheSyncConfig,
        relational: Arc<dyn RelationalStore>,
        table_metadata: Arc<dyn TableMetadata>,
    ) -> Result<Self, StorageError> {
        let redis = Arc::new(RedisStore::from_config(&config).await?);
        let cache_ops = Arc::new(CacheOps::from_config(&config));
        let stores = Stores {
            key_infos: Arc::new(redis.key_info_store(&config)),
            distributed: redis.clone(),
            relational,
            table_metadata: Arc::new(CachedTableMetadata::new(table_metadata, cache_ops.clone())),
        };
        let expire_ops = Arc::new(ExpireOps::new(stores, &config).with_cache_ops(cache_ops.clone()));
        Ok(Self::new(config, cache_ops, expire_ops, redis))
    }

    pub fn cache_ops(&self) -> &Arc<CacheOps> {
        &self.cache_ops
    }

    pub fn expire_ops(&self) -> &Arc<ExpireOps> {
        &self.expire_ops
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RuntimeState) {
        metrics::set_runtime_state(&state.to_string());
        // send_replace: the value must update even with no subscribers
        self.state.send_replace(state);
    }

    /// Start both background loops. No-op when already running.
    pub fn start(&mut self) {
        if self.state() == RuntimeState::Running {
            return;
        }
        self.recycler = Some(CacheRecycler::start(
            Arc::clone(self.cache_ops.local_cache()),
            self.config.recycle_interval(),
        ));
        self.listener = Some(
            ExpirationListener::new(
                Arc::clone(&self.expire_ops),
                Arc::clone(&self.feed),
                RetryConfig::fixed(self.config.listener_retry_delay()),
            )
            .spawn(),
        );
        info!(
            recycle_secs = self.config.recycle_interval().as_secs(),
            prefix = %self.expire_ops.codec().prefix(),
            "Cache sync runtime started"
        );
        self.set_state(RuntimeState::Running);
    }

    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running
    }

    /// Stop both loops and wait for them.
    pub async fn shutdown(&mut self) {
        self.set_state(RuntimeState::ShuttingDown);
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }
        if let Some(recycler) = self.recycler.take() {
            recycler.shutdown().await;
        }
        self.set_state(RuntimeState::Stopped);
        info!("Cache sync runtime stopped");
    }
}
