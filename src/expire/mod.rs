// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distributed expiration and write-back protocol.
//!
//! # Lifecycle of one key
//!
//! ```text
//!  {no marker} ──set_expire_key──► {armed} ──fires──► on_expire_event
//!                                                        │
//!                                         lock (one winner per firing)
//!                                                        │
//!                      ┌─────────────────────────────────┼──────────────┐
//!                      ▼                                 ▼              ▼
//!          X / +X: write back                 -X: refresh            0: no-op
//!          distributed → relational           relational → distributed
//!          drop data + KeyInfo row            re-arm a fresh -X marker
//! ```
//!
//! Every instance receives every notification; the lock keyed by the
//! firing's trace id is what makes handling at-most-once per firing.

pub mod event;
pub mod listener;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::cache_ops::CacheOps;
use crate::config::CacheSyncConfig;
use crate::context::{new_trace_id, Context, TraceSink, TracingSink};
use crate::metrics;
use crate::model::{AnyKey, ExpireSpec, ExpireSpecError, KeyInfo, KvIdType, KvPair, KvPairs, QueryDescriptor};
use crate::storage::traits::{
    check_aligned, DistributedCacheStore, KeyInfoStore, MarkerOutcome, MarkerRequest,
    RelationalStore, StorageError, TableMetadata,
};

pub use event::{EventParseError, ExpireEvent, KeyCodec, QueryTag};
pub use listener::{ExpirationListener, ListenerHandle};

#[derive(Error, Debug)]
pub enum ExpireError {
    #[error(transparent)]
    Spec(#[from] ExpireSpecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Collaborators the protocol talks to.
#[derive(Clone)]
pub struct Stores {
    pub key_infos: Arc<dyn KeyInfoStore>,
    pub distributed: Arc<dyn DistributedCacheStore>,
    pub relational: Arc<dyn RelationalStore>,
    pub table_metadata: Arc<dyn TableMetadata>,
}

/// What handling one notification amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not one of our markers.
    Ignored,
    /// Ours, but unparsable.
    Malformed,
    /// Another handler holds this firing's lock.
    Contended,
    WrittenBack,
    Refreshed,
    /// Clear spec: nothing to do.
    NoOp,
    /// Value or metadata missing, or a store failed. Lock released.
    Abandoned,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
            Self::Contended => "contended",
            Self::WrittenBack => "written_back",
            Self::Refreshed => "refreshed",
            Self::NoOp => "noop",
            Self::Abandoned => "abandoned",
        }
    }
}

pub struct ExpireOps {
    stores: Stores,
    codec: KeyCodec,
    lock_timeout: Duration,
    enable_monitor: bool,
    cache_ops: Option<Arc<CacheOps>>,
    trace_sink: Arc<dyn TraceSink>,
    write_targets: RwLock<HashMap<String, Arc<dyn RelationalStore>>>,
}

impl ExpireOps {
    pub fn new(stores: Stores, config: &CacheSyncConfig) -> Self {
        Self {
            stores,
            codec: KeyCodec::new(&config.event_prefix),
            lock_timeout: config.lock_timeout(),
            enable_monitor: config.enable_monitor,
            cache_ops: None,
            trace_sink: Arc::new(TracingSink),
            write_targets: RwLock::new(HashMap::new()),
        }
    }

    /// Keep the local tier coherent with write-backs and refreshes.
    #[must_use]
    pub fn with_cache_ops(mut self, cache_ops: Arc<CacheOps>) -> Self {
        self.cache_ops = Some(cache_ops);
        self
    }

    #[must_use]
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    /// Route write-backs of markers tagged `={name}` to `store`.
    pub fn register_write_target(&self, name: impl Into<String>, store: Arc<dyn RelationalStore>) {
        let name = name.into();
        debug!(target_name = %name, "Registered write-back target");
        self.write_targets.write().insert(name, store);
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Request context wired to this instance's sink and monitor setting.
    pub fn new_context(&self) -> Context {
        Context::new()
            .with_monitor(self.enable_monitor)
            .with_sink(self.trace_sink.clone())
    }

    /// Submit `info`'s expire spec for `id` and persist freshly derived
    /// metadata. Query-derived metadata is never persisted.
    #[instrument(skip(self, ctx, info), fields(trace_id = %ctx.trace_id(), key = %id.hash_key()))]
    pub async fn set_expire_key(
        &self,
        ctx: &Context,
        id: &KvIdType,
        info: &mut KeyInfo,
    ) -> Result<MarkerOutcome, ExpireError> {
        let spec = info.expire_spec()?;
        let outcome = self.arm(ctx, id, info, spec).await?;

        if info.is_new && !info.query_derived {
            let _sw = ctx.start_stopwatch("keyinfo", "save");
            self.stores.key_infos.save(id, info).await?;
        }
        Ok(outcome)
    }

    /// [`set_expire_key`](Self::set_expire_key) for each pair, index for index.
    pub async fn set_expire_keys(
        &self,
        ctx: &Context,
        pairs: &KvPairs,
        keys: &mut AnyKey,
    ) -> Result<Vec<MarkerOutcome>, ExpireError> {
        check_aligned(pairs, keys)?;
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (pair, info) in pairs.iter().zip(keys.iter_mut()) {
            outcomes.push(self.set_expire_key(ctx, &pair.id_type(), info).await?);
        }
        Ok(outcomes)
    }

    async fn arm(
        &self,
        ctx: &Context,
        id: &KvIdType,
        info: &KeyInfo,
        spec: ExpireSpec,
    ) -> Result<MarkerOutcome, StorageError> {
        let base = self.codec.marker_base(id, info, &spec);
        let request = MarkerRequest {
            pointer: self.codec.pointer(&base),
            base,
            trace_id: ctx.trace_id().to_string(),
            spec,
        };
        let outcome = {
            let _sw = ctx.start_stopwatch("redis", "set_marker");
            self.stores.distributed.set_marker(&request).await?
        };
        trace!(marker = %request.armed_key(), spec = %spec, outcome = outcome.as_str(), "Marker submitted");
        metrics::record_marker(outcome.as_str());
        Ok(outcome)
    }

    /// Handle one expired-key notification. Never fails: problems are
    /// logged against the firing's trace id and the event is abandoned.
    #[instrument(skip(self))]
    pub async fn on_expire_event(&self, raw: &str) -> EventOutcome {
        let event = match self.codec.parse(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return EventOutcome::Ignored,
            Err(e) => {
                warn!(error = %e, "Dropping malformed expire event");
                metrics::record_expire_event(EventOutcome::Malformed.as_str());
                return EventOutcome::Malformed;
            }
        };
        debug!(trace_id = %event.trace_id, key = %event.id_type().hash_key(), "Received expire event");

        let start = Instant::now();
        let ctx = Context::with_trace_id(event.trace_id.clone())
            .with_monitor(self.enable_monitor)
            .with_sink(self.trace_sink.clone());
        let lock_key = self.codec.lock_key(&event);
        let signature = new_trace_id();

        let acquired = {
            let _sw = ctx.start_stopwatch("redis", "acquire_lock");
            self.stores
                .distributed
                .acquire_lock(&lock_key, &signature, self.lock_timeout)
                .await
        };
        match acquired {
            Ok(true) => {}
            Ok(false) => {
                trace!(lock = %lock_key, "Firing already claimed by another handler");
                metrics::record_expire_event(EventOutcome::Contended.as_str());
                return EventOutcome::Contended;
            }
            Err(e) => {
                error!(lock = %lock_key, error = %e, "Could not acquire expiration lock");
                ctx.log_trace_message(format!("acquire lock {} failed: {}", lock_key, e));
                metrics::record_expire_event(EventOutcome::Abandoned.as_str());
                return EventOutcome::Abandoned;
            }
        }

        let outcome = match self.handle(&ctx, &event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(trace_id = %event.trace_id, error = %e, "Expire event handling failed");
                ctx.log_trace_message(format!("expire event {} failed: {}", raw, e));
                EventOutcome::Abandoned
            }
        };

        let released = {
            let _sw = ctx.start_stopwatch("redis", "release_lock");
            self.stores.distributed.release_lock(&lock_key, &signature).await
        };
        match released {
            Ok(true) => {}
            Ok(false) => {
                warn!(lock = %lock_key, "Expiration lock expired or was taken over before release");
                metrics::record_lock_lost();
            }
            Err(e) => warn!(lock = %lock_key, error = %e, "Lock release failed, relying on its TTL"),
        }

        metrics::record_expire_event(outcome.as_str());
        metrics::record_expire_latency(start.elapsed());
        ctx.close();
        outcome
    }

    async fn handle(&self, ctx: &Context, event: &ExpireEvent) -> Result<EventOutcome, ExpireError> {
        let id = event.id_type();
        let Some(info) = self.resolve_key_info(ctx, &id, event).await? else {
            return Ok(abandon(ctx, format!("no key info for {}", id.hash_key())));
        };

        match info.expire_spec()? {
            ExpireSpec::Clear => Ok(EventOutcome::NoOp),
            spec if spec.is_refresh() => self.refresh(ctx, &id, &info, spec).await,
            _ => self.write_back(ctx, &id, &info).await,
        }
    }

    async fn resolve_key_info(
        &self,
        ctx: &Context,
        id: &KvIdType,
        event: &ExpireEvent,
    ) -> Result<Option<KeyInfo>, StorageError> {
        let Some(ref tag) = event.query else {
            let _sw = ctx.start_stopwatch("keyinfo", "find");
            return self.stores.key_infos.find(id).await;
        };

        let indexes = {
            let _sw = ctx.start_stopwatch("dbase", "primary_indexes");
            self.stores.table_metadata.primary_indexes(&id.type_name).await
        };
        let values: Vec<&str> = id.id.split(':').collect();
        let mut info = match indexes {
            Ok(Some(indexes)) if !indexes.is_empty() && indexes.len() == values.len() => {
                KeyInfo::for_primary_key(&id.type_name, indexes, &values)
            }
            Ok(_) => {
                ctx.log_trace_message(format!(
                    "primary index of {} does not match {}, using placeholder key info",
                    id.type_name, id.id
                ));
                KeyInfo::placeholder()
            }
            Err(e) => {
                ctx.log_trace_message(format!(
                    "primary index of {} unavailable ({}), using placeholder key info",
                    id.type_name, e
                ));
                KeyInfo::placeholder()
            }
        };

        // Keep the original filter's hash so a re-armed marker lands on the
        // same base as the one clients arm.
        match info.query {
            Some(ref mut query) => query.content_hash = tag.content_hash.clone(),
            None => {
                info.query = Some(QueryDescriptor {
                    clause: String::new(),
                    params: vec![],
                    content_hash: tag.content_hash.clone(),
                })
            }
        }
        info.expire = tag.spec.to_string();
        info.write_target = tag.target.clone();
        Ok(Some(info))
    }

    /// Store a named target, or the default relational store.
    fn target_for(&self, info: &KeyInfo) -> Result<Arc<dyn RelationalStore>, String> {
        let Some(ref name) = info.write_target else {
            return Ok(self.stores.relational.clone());
        };
        self.write_targets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown write-back target {}", name))
    }

    async fn write_back(
        &self,
        ctx: &Context,
        id: &KvIdType,
        info: &KeyInfo,
    ) -> Result<EventOutcome, ExpireError> {
        let target = match self.target_for(info) {
            Ok(target) => target,
            Err(message) => return Ok(abandon(ctx, message)),
        };

        let mut pair = KvPair::from(id.clone());
        let found = {
            let _sw = ctx.start_stopwatch("redis", "find");
            self.stores.distributed.find(&mut pair).await?
        };
        if !found {
            return Ok(abandon(ctx, format!("nothing cached to write back for {}", id.hash_key())));
        }

        {
            let _sw = ctx.start_stopwatch("dbase", "save");
            target.save(&pair, info).await?;
        }
        {
            let _sw = ctx.start_stopwatch("redis", "delete");
            self.stores.distributed.delete(id).await?;
        }
        if !info.query_derived {
            let _sw = ctx.start_stopwatch("keyinfo", "delete");
            self.stores.key_infos.delete(id).await?;
        }

        if let Some(ref cache_ops) = self.cache_ops {
            cache_ops.remove_data(id);
            if !info.query_derived {
                cache_ops.remove_key_info(id);
            }
        }
        info!(key = %id.hash_key(), table = %info.table_or(&id.type_name), "Wrote back expired entry");
        Ok(EventOutcome::WrittenBack)
    }

    async fn refresh(
        &self,
        ctx: &Context,
        id: &KvIdType,
        info: &KeyInfo,
        spec: ExpireSpec,
    ) -> Result<EventOutcome, ExpireError> {
        let source = match self.target_for(info) {
            Ok(source) => source,
            Err(message) => return Ok(abandon(ctx, message)),
        };

        let mut pair = KvPair::from(id.clone());
        let found = {
            let _sw = ctx.start_stopwatch("dbase", "find");
            source.find(&mut pair, info).await?
        };
        if !found {
            return Ok(abandon(ctx, format!("no durable row to refresh {}", id.hash_key())));
        }

        {
            let _sw = ctx.start_stopwatch("redis", "save");
            self.stores.distributed.save(&pair).await?;
        }

        // The fired marker is gone; the next one gets its own trace id.
        let next = Context::new().with_sink(self.trace_sink.clone());
        self.arm(&next, id, info, spec).await?;

        if let Some(ref cache_ops) = self.cache_ops {
            cache_ops.put_data(&pair, info);
        }
        debug!(key = %id.hash_key(), next_trace_id = %next.trace_id(), "Refreshed entry and re-armed heartbeat");
        Ok(EventOutcome::Refreshed)
    }
}

/// Give up on a firing whose write-back or refresh cannot proceed.
fn abandon(ctx: &Context, message: String) -> EventOutcome {
    error!(trace_id = %ctx.trace_id(), "{}", message);
    ctx.log_trace_message(message);
    EventOutcome::Abandoned
}
