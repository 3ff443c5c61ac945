// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespaced view over the [`LocalCache`].
//!
//! | Namespace | Key | TTL |
//! |-----------|-----|-----|
//! | metadata  | `meta::{type}:{id}` | max(expire, `key_min_cache_ttl`) |
//! | data      | `{type}::{id}` | min(expire, `data_max_cache_ttl`) |
//! | table     | `table_{name}` | `table_info_cache_ttl` |
//!
//! A floor or ceiling of zero or less turns that namespace off: puts are
//! skipped and report `false`.
//!
//! Data keys share the flat key space with the other two namespaces, so a
//! type named `meta` or starting with `table_` has no data namespace. Data
//! calls for such a type are no-ops.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::config::CacheSyncConfig;
use crate::local_cache::LocalCache;
use crate::model::{AnyKey, KeyInfo, KvIdType, KvPair, KvPairs, ValueMap};
use crate::storage::traits::{check_aligned, StorageError, TableMetadata};

const META_PREFIX: &str = "meta::";
const TABLE_PREFIX: &str = "table_";
const TABLE_FIELD: &str = "primary_indexes";

pub struct CacheOps {
    cache: Arc<LocalCache>,
    key_min_ttl: i64,
    data_max_ttl: i64,
    table_info_ttl: i64,
}

impl CacheOps {
    pub fn new(cache: Arc<LocalCache>, config: &CacheSyncConfig) -> Self {
        Self {
            cache,
            key_min_ttl: config.key_min_cache_ttl,
            data_max_ttl: config.data_max_cache_ttl,
            table_info_ttl: config.table_info_cache_ttl,
        }
    }

    /// Fresh LocalCache sized from `config`.
    pub fn from_config(config: &CacheSyncConfig) -> Self {
        let cache = LocalCache::new(
            config.max_cache_size,
            Duration::from_secs(config.local_max_ttl_secs()),
        );
        Self::new(Arc::new(cache), config)
    }

    pub fn local_cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn meta_key(id: &KvIdType) -> String {
        format!("{}{}:{}", META_PREFIX, id.type_name, id.id)
    }

    pub fn data_key(id: &KvIdType) -> String {
        format!("{}::{}", id.type_name, id.id)
    }

    pub fn table_key(table: &str) -> String {
        format!("{}{}", TABLE_PREFIX, table)
    }

    fn meta_prefix(type_name: &str) -> String {
        format!("{}{}:", META_PREFIX, type_name)
    }

    fn data_prefix(type_name: &str) -> String {
        format!("{}::", type_name)
    }

    /// Type names whose data keys would land in another namespace.
    pub fn is_reserved_type(type_name: &str) -> bool {
        format!("{}::", type_name).starts_with(META_PREFIX) || type_name.starts_with(TABLE_PREFIX)
    }

    fn data_key_of(id: &KvIdType) -> Option<String> {
        if Self::is_reserved_type(&id.type_name) {
            return None;
        }
        Some(Self::data_key(id))
    }

    /// Metadata TTL: the record's own expiry raised to the floor.
    pub fn key_info_ttl(&self, info: &KeyInfo) -> Option<Duration> {
        if self.key_min_ttl <= 0 {
            return None;
        }
        let floor = self.key_min_ttl as u64;
        Some(Duration::from_secs(info.expire_ttl().max(floor)))
    }

    /// Data TTL: the record's own expiry capped at the ceiling. An unbounded
    /// (zero) expiry gets the ceiling.
    pub fn data_ttl(&self, info: &KeyInfo) -> Option<Duration> {
        if self.data_max_ttl <= 0 {
            return None;
        }
        let ceiling = self.data_max_ttl as u64;
        let ttl = match info.expire_ttl() {
            0 => ceiling,
            secs => secs.min(ceiling),
        };
        Some(Duration::from_secs(ttl))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Metadata
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_key_info(&self, id: &KvIdType, info: &KeyInfo) -> bool {
        let Some(ttl) = self.key_info_ttl(info) else {
            return false;
        };
        match serde_json::to_value(info) {
            Ok(Value::Object(map)) => {
                self.cache.put(Self::meta_key(id), map, Some(ttl));
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(key = %id.hash_key(), error = %e, "Cannot cache key info");
                false
            }
        }
    }

    pub fn get_key_info(&self, id: &KvIdType) -> Option<KeyInfo> {
        let map = self.cache.get(&Self::meta_key(id))?;
        match serde_json::from_value(Value::Object(map)) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(key = %id.hash_key(), error = %e, "Dropping unreadable cached key info");
                self.cache.remove(&Self::meta_key(id));
                None
            }
        }
    }

    pub fn contains_key_info(&self, id: &KvIdType) -> bool {
        self.cache.contains_key(&Self::meta_key(id))
    }

    pub fn remove_key_info(&self, id: &KvIdType) -> bool {
        self.cache.remove(&Self::meta_key(id)).is_some()
    }

    pub fn put_key_infos(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        Ok(pairs
            .iter()
            .zip(keys.iter())
            .filter(|(pair, info)| self.put_key_info(&pair.id_type(), info))
            .count())
    }

    pub fn get_key_infos(&self, ids: &[KvIdType]) -> Vec<Option<KeyInfo>> {
        ids.iter().map(|id| self.get_key_info(id)).collect()
    }

    /// Every live metadata entry of `type_name`, keyed by id.
    pub fn list_key_infos(&self, type_name: &str) -> Vec<(String, KeyInfo)> {
        let prefix = Self::meta_prefix(type_name);
        self.cache
            .list_prefixed(&prefix)
            .into_iter()
            .filter_map(|(key, map)| {
                let id = key.strip_prefix(&prefix)?.to_string();
                serde_json::from_value(Value::Object(map)).ok().map(|info| (id, info))
            })
            .collect()
    }

    pub fn remove_key_infos(&self, type_name: &str) -> usize {
        let prefix = Self::meta_prefix(type_name);
        self.cache.remove_where(|k| k.starts_with(&prefix))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Data
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_data(&self, pair: &KvPair, info: &KeyInfo) -> bool {
        let Some(key) = Self::data_key_of(&pair.id_type()) else {
            warn!(type_name = %pair.type_name, "Reserved type name, data not cached");
            return false;
        };
        let (Some(ttl), Some(map)) = (self.data_ttl(info), pair.data_map()) else {
            return false;
        };
        self.cache.put(key, map, Some(ttl));
        true
    }

    /// Populate `pair.value` from the local tier.
    pub fn get_data(&self, pair: &mut KvPair) -> bool {
        let Some(key) = Self::data_key_of(&pair.id_type()) else {
            return false;
        };
        match self.cache.get(&key) {
            Some(map) => {
                pair.set_map(map);
                true
            }
            None => false,
        }
    }

    /// Merge the pair's fields into the cached value.
    pub fn update_data(&self, pair: &KvPair) -> bool {
        match (Self::data_key_of(&pair.id_type()), pair.data_map()) {
            (Some(key), Some(partial)) => self.cache.update(&key, partial),
            _ => false,
        }
    }

    pub fn contains_data(&self, id: &KvIdType) -> bool {
        Self::data_key_of(id).is_some_and(|key| self.cache.contains_key(&key))
    }

    pub fn remove_data(&self, id: &KvIdType) -> bool {
        Self::data_key_of(id).is_some_and(|key| self.cache.remove(&key).is_some())
    }

    pub fn put_data_many(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        Ok(pairs
            .iter()
            .zip(keys.iter())
            .filter(|(pair, info)| self.put_data(pair, info))
            .count())
    }

    pub fn get_data_many(&self, pairs: &mut KvPairs) -> usize {
        let mut found = 0;
        for pair in pairs.iter_mut() {
            if self.get_data(pair) {
                found += 1;
            }
        }
        found
    }

    pub fn list_data(&self, type_name: &str) -> Vec<KvPair> {
        if Self::is_reserved_type(type_name) {
            return Vec::new();
        }
        let prefix = Self::data_prefix(type_name);
        self.cache
            .list_prefixed(&prefix)
            .into_iter()
            .filter_map(|(key, map)| {
                let id = key.strip_prefix(&prefix)?;
                Some(KvPair::with_map(id, type_name, map))
            })
            .collect()
    }

    pub fn remove_data_of(&self, type_name: &str) -> usize {
        if Self::is_reserved_type(type_name) {
            return 0;
        }
        let prefix = Self::data_prefix(type_name);
        self.cache.remove_where(|k| k.starts_with(&prefix))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Both namespaces
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop metadata and data for `id`. Returns what was present.
    pub fn remove(&self, id: &KvIdType) -> (bool, bool) {
        let meta = self.cache.remove(&Self::meta_key(id)).is_some();
        let data = self.remove_data(id);
        trace!(key = %id.hash_key(), meta, data, "Removed local entries");
        (meta, data)
    }

    pub fn remove_many(&self, ids: &[KvIdType]) -> usize {
        let keys: std::collections::HashSet<String> = ids
            .iter()
            .flat_map(|id| std::iter::once(Self::meta_key(id)).chain(Self::data_key_of(id)))
            .collect();
        self.cache.remove_where(|k| keys.contains(k))
    }

    /// Clear every entry except cached table metadata.
    pub fn remove_all_except_tables(&self) -> usize {
        self.cache.remove_where(|k| !k.starts_with(TABLE_PREFIX))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Table metadata
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_table_info(&self, table: &str, indexes: &[String]) -> bool {
        if self.table_info_ttl <= 0 {
            return false;
        }
        let mut map = ValueMap::new();
        map.insert(
            TABLE_FIELD.to_string(),
            Value::Array(indexes.iter().cloned().map(Value::String).collect()),
        );
        self.cache.put(
            Self::table_key(table),
            map,
            Some(Duration::from_secs(self.table_info_ttl as u64)),
        );
        true
    }

    pub fn get_table_info(&self, table: &str) -> Option<Vec<String>> {
        let map = self.cache.get(&Self::table_key(table))?;
        Self::indexes_of(&map)
    }

    fn indexes_of(map: &ValueMap) -> Option<Vec<String>> {
        map.get(TABLE_FIELD)?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn list_all_tables(&self) -> Vec<(String, Vec<String>)> {
        self.cache
            .list_prefixed(TABLE_PREFIX)
            .into_iter()
            .filter_map(|(key, map)| {
                let table = key.strip_prefix(TABLE_PREFIX)?.to_string();
                Self::indexes_of(&map).map(|idx| (table, idx))
            })
            .collect()
    }

    pub fn remove_all_tables(&self) -> usize {
        self.cache.remove_where(|k| k.starts_with(TABLE_PREFIX))
    }
}

/// [`TableMetadata`] provider fronted by the `table_{name}` namespace.
pub struct CachedTableMetadata {
    inner: Arc<dyn TableMetadata>,
    cache_ops: Arc<CacheOps>,
}

impl CachedTableMetadata {
    pub fn new(inner: Arc<dyn TableMetadata>, cache_ops: Arc<CacheOps>) -> Self {
        Self { inner, cache_ops }
    }
}

#[async_trait]
impl TableMetadata for CachedTableMetadata {
    async fn primary_indexes(&self, table: &str) -> Result<Option<Vec<String>>, StorageError> {
        if let Some(indexes) = self.cache_ops.get_table_info(table) {
            return Ok(Some(indexes));
        }
        let indexes = self.inner.primary_indexes(table).await?;
        if let Some(ref idx) = indexes {
            self.cache_ops.put_table_info(table, idx);
        }
        Ok(indexes)
    }
}
