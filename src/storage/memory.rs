//! In-memory collaborators.
//!
//! Used by tests and by embedders without Redis. The distributed store
//! emulates marker and lock TTLs with deadlines and publishes expirations
//! through [`ExpirationFeed`] when [`MemoryDistributedStore::expire_due`] or
//! [`MemoryDistributedStore::fire_marker`] is called.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::trace;

use super::traits::{
    DistributedCacheStore, ExpirationFeed, KeyInfoStore, MarkerOutcome, MarkerRequest,
    RelationalStore, StorageError, TableMetadata,
};
use crate::model::{ExpireSpec, KeyInfo, KvIdType, KvPair};

#[derive(Default)]
pub struct MemoryKeyInfoStore {
    rows: DashMap<String, KeyInfo>,
}

impl MemoryKeyInfoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &KvIdType) -> bool {
        self.rows.contains_key(&id.hash_key())
    }
}

#[async_trait]
impl KeyInfoStore for MemoryKeyInfoStore {
    async fn find(&self, id: &KvIdType) -> Result<Option<KeyInfo>, StorageError> {
        Ok(self.rows.get(&id.hash_key()).map(|r| r.value().clone()))
    }

    async fn save(&self, id: &KvIdType, info: &mut KeyInfo) -> Result<(), StorageError> {
        info.is_new = false;
        self.rows.insert(id.hash_key(), info.clone());
        Ok(())
    }

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError> {
        Ok(self.rows.remove(&id.hash_key()).is_some())
    }
}

#[derive(Debug, Clone)]
struct Timed {
    value: String,
    deadline: Instant,
}

impl Timed {
    fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            deadline: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        self.deadline > Instant::now()
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A live marker (or pointer) as seen by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSnapshot {
    pub key: String,
    pub value: String,
    pub remaining: Duration,
}

pub struct MemoryDistributedStore {
    data: DashMap<String, Value>,
    markers: Mutex<HashMap<String, Timed>>,
    locks: Mutex<HashMap<String, Timed>>,
    expired_tx: broadcast::Sender<String>,
}

impl Default for MemoryDistributedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDistributedStore {
    #[must_use]
    pub fn new() -> Self {
        let (expired_tx, _) = broadcast::channel(1024);
        Self {
            data: DashMap::new(),
            markers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            expired_tx,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value(&self, id: &KvIdType) -> Option<Value> {
        self.data.get(&id.hash_key()).map(|v| v.value().clone())
    }

    /// Live markers and pointers whose key starts with `prefix`.
    pub fn markers(&self, prefix: &str) -> Vec<MarkerSnapshot> {
        let mut live: Vec<MarkerSnapshot> = self
            .markers
            .lock()
            .iter()
            .filter(|(k, t)| k.starts_with(prefix) && t.is_live())
            .map(|(k, t)| MarkerSnapshot {
                key: k.clone(),
                value: t.value.clone(),
                remaining: t.remaining(),
            })
            .collect();
        live.sort_by(|a, b| a.key.cmp(&b.key));
        live
    }

    /// The live marker currently armed for `base`, found through `pointer`.
    pub fn marker_for(&self, base: &str, pointer: &str) -> Option<MarkerSnapshot> {
        let markers = self.markers.lock();
        let trace_id = markers.get(pointer).filter(|t| t.is_live())?.value.clone();
        let key = format!("{}::{}", base, trace_id);
        markers.get(&key).filter(|t| t.is_live()).map(|t| MarkerSnapshot {
            key,
            value: t.value.clone(),
            remaining: t.remaining(),
        })
    }

    pub fn lock_holder(&self, key: &str) -> Option<String> {
        self.locks
            .lock()
            .get(key)
            .filter(|t| t.is_live())
            .map(|t| t.value.clone())
    }

    fn publish(&self, key: String) {
        trace!(key = %key, "Emitting expiration");
        // no receivers is fine
        let _ = self.expired_tx.send(key);
    }

    /// Expire `key` now, as if its TTL had run out.
    pub fn expire_key(&self, key: &str) -> bool {
        let removed = self.markers.lock().remove(key).is_some();
        if removed {
            self.publish(key.to_string());
        }
        removed
    }

    /// Fire the marker armed for `base` (and drop its pointer). Returns the
    /// expired marker key.
    pub fn fire_marker(&self, base: &str, pointer: &str) -> Option<String> {
        let key = {
            let mut markers = self.markers.lock();
            let trace_id = markers.remove(pointer)?.value;
            let key = format!("{}::{}", base, trace_id);
            markers.remove(&key)?;
            key
        };
        self.publish(key.clone());
        Some(key)
    }

    /// Expire everything whose deadline has passed. Returns the keys.
    pub fn expire_due(&self) -> Vec<String> {
        let due: Vec<String> = {
            let mut markers = self.markers.lock();
            let keys: Vec<String> = markers
                .iter()
                .filter(|(_, t)| !t.is_live())
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                markers.remove(key);
            }
            keys
        };
        self.locks.lock().retain(|_, t| t.is_live());
        for key in &due {
            self.publish(key.clone());
        }
        due
    }
}

#[async_trait]
impl DistributedCacheStore for MemoryDistributedStore {
    async fn exists(&self, id: &KvIdType) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(&id.hash_key()))
    }

    async fn find(&self, pair: &mut KvPair) -> Result<bool, StorageError> {
        match self.data.get(&pair.hash_key()) {
            Some(v) => {
                pair.value = v.value().clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save(&self, pair: &KvPair) -> Result<(), StorageError> {
        self.data.insert(pair.hash_key(), pair.value.clone());
        Ok(())
    }

    async fn update(&self, pair: &KvPair) -> Result<bool, StorageError> {
        let Some(mut current) = self.data.get_mut(&pair.hash_key()) else {
            return Ok(false);
        };
        match (current.value_mut(), &pair.value) {
            (Value::Object(existing), Value::Object(partial)) => {
                existing.extend(partial.clone());
            }
            (slot, value) => *slot = value.clone(),
        }
        Ok(true)
    }

    async fn find_and_save(&self, pair: &KvPair) -> Result<Option<Value>, StorageError> {
        Ok(self.data.insert(pair.hash_key(), pair.value.clone()))
    }

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError> {
        Ok(self.data.remove(&id.hash_key()).is_some())
    }

    async fn set_marker(&self, request: &MarkerRequest) -> Result<MarkerOutcome, StorageError> {
        let mut markers = self.markers.lock();
        let current = markers
            .get(&request.pointer)
            .filter(|t| t.is_live())
            .map(|t| format!("{}::{}", request.base, t.value));

        let arm = |markers: &mut HashMap<String, Timed>, ttl: u64| {
            let ttl = Duration::from_secs(ttl);
            markers.insert(request.armed_key(), Timed::new(request.spec.to_string(), ttl));
            markers.insert(request.pointer.clone(), Timed::new(request.trace_id.clone(), ttl));
        };

        Ok(match request.spec {
            ExpireSpec::Clear => {
                if let Some(key) = current {
                    markers.remove(&key);
                }
                markers.remove(&request.pointer);
                MarkerOutcome::Cleared
            }
            ExpireSpec::Force(ttl) => {
                if let Some(key) = current {
                    markers.remove(&key);
                }
                arm(&mut markers, ttl);
                MarkerOutcome::Armed
            }
            ExpireSpec::Once(ttl) | ExpireSpec::Recurring(ttl) => {
                let live = current
                    .as_ref()
                    .and_then(|k| markers.get(k))
                    .is_some_and(Timed::is_live);
                if live {
                    MarkerOutcome::Kept
                } else {
                    arm(&mut markers, ttl);
                    MarkerOutcome::Armed
                }
            }
        })
    }

    async fn acquire_lock(
        &self,
        key: &str,
        signature: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(Timed::is_live) {
            return Ok(false);
        }
        locks.insert(key.to_string(), Timed::new(signature, ttl));
        Ok(true)
    }

    async fn release_lock(&self, key: &str, signature: &str) -> Result<bool, StorageError> {
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(t) if t.value == signature => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ExpirationFeed for MemoryDistributedStore {
    async fn ensure_notifications(&self) -> Result<(), StorageError> {
        trace!("In-memory store always emits expirations");
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StorageError> {
        let rx = self.expired_tx.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(key) => return Some((key, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Expiration subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Durable rows keyed by `{table}:{id}`.
#[derive(Default)]
pub struct MemoryRelationalStore {
    rows: DashMap<String, Value>,
}

impl MemoryRelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn row_key(pair: &KvPair, info: &KeyInfo) -> String {
        format!("{}:{}", info.table_or(&pair.type_name), pair.id)
    }

    pub fn insert_row(&self, table: &str, id: &str, value: Value) {
        self.rows.insert(format!("{}:{}", table, id), value);
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.rows.get(&format!("{}:{}", table, id)).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn find(&self, pair: &mut KvPair, info: &KeyInfo) -> Result<bool, StorageError> {
        match self.rows.get(&Self::row_key(pair, info)) {
            Some(row) => {
                pair.value = row.value().clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save(&self, pair: &KvPair, info: &KeyInfo) -> Result<(), StorageError> {
        self.rows.insert(Self::row_key(pair, info), pair.value.clone());
        Ok(())
    }

    async fn insert(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError> {
        use dashmap::mapref::entry::Entry;
        match self.rows.entry(Self::row_key(pair, info)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(pair.value.clone());
                Ok(true)
            }
        }
    }

    async fn update(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError> {
        match self.rows.get_mut(&Self::row_key(pair, info)) {
            Some(mut row) => {
                *row.value_mut() = pair.value.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError> {
        Ok(self.rows.remove(&Self::row_key(pair, info)).is_some())
    }
}

#[derive(Default)]
pub struct MemoryTableMetadata {
    tables: DashMap<String, Vec<String>>,
    lookups: AtomicUsize,
}

impl MemoryTableMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(self, table: &str, indexes: &[&str]) -> Self {
        self.tables.insert(
            table.to_string(),
            indexes.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Number of `primary_indexes` calls served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TableMetadata for MemoryTableMetadata {
    async fn primary_indexes(&self, table: &str) -> Result<Option<Vec<String>>, StorageError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.get(table).map(|r| r.value().clone()))
    }
}
