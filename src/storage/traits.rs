//! Collaborator contracts consumed by the cache layer.
//!
//! ```text
//! KeyInfoStore           per-key metadata rows
//! DistributedCacheStore  shared data tier + markers + expiration locks
//! RelationalStore        durable tier (and pluggable write-back targets)
//! TableMetadata          primary-index names per table
//! ExpirationFeed         marker-expired notifications
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::model::{AnyKey, ExpireSpec, KeyInfo, KvIdType, KvPair, KvPairs};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Misaligned batch: {pairs} pairs vs {keys} key infos")]
    Misaligned { pairs: usize, keys: usize },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Batch operations consume pairs and metadata index-for-index.
pub fn check_aligned(pairs: &KvPairs, keys: &AnyKey) -> Result<(), StorageError> {
    if pairs.len() != keys.len() {
        return Err(StorageError::Misaligned {
            pairs: pairs.len(),
            keys: keys.len(),
        });
    }
    Ok(())
}

#[async_trait]
pub trait KeyInfoStore: Send + Sync {
    async fn find(&self, id: &KvIdType) -> Result<Option<KeyInfo>, StorageError>;

    /// Persist `info`; clears its `is_new` flag on success.
    async fn save(&self, id: &KvIdType, info: &mut KeyInfo) -> Result<(), StorageError>;

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError>;

    async fn find_many(&self, ids: &[KvIdType]) -> Result<Vec<Option<KeyInfo>>, StorageError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.push(self.find(id).await?);
        }
        Ok(found)
    }

    async fn save_many(&self, pairs: &KvPairs, keys: &mut AnyKey) -> Result<(), StorageError> {
        check_aligned(pairs, keys)?;
        for (pair, info) in pairs.iter().zip(keys.iter_mut()) {
            self.save(&pair.id_type(), info).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[KvIdType]) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Input to the atomic marker check-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRequest {
    /// Marker base key; the armed key is `{base}::{trace_id}`.
    pub base: String,
    /// Key holding the trace id of the live marker for `base`.
    pub pointer: String,
    pub trace_id: String,
    pub spec: ExpireSpec,
}

impl MarkerRequest {
    pub fn armed_key(&self) -> String {
        format!("{}::{}", self.base, self.trace_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// A new marker was created.
    Armed,
    /// A live marker already existed and was left alone.
    Kept,
    /// Any existing marker was removed; nothing armed.
    Cleared,
}

impl MarkerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Armed => "armed",
            Self::Kept => "kept",
            Self::Cleared => "cleared",
        }
    }
}

#[async_trait]
pub trait DistributedCacheStore: Send + Sync {
    async fn exists(&self, id: &KvIdType) -> Result<bool, StorageError>;

    /// Populate `pair.value`; false when absent.
    async fn find(&self, pair: &mut KvPair) -> Result<bool, StorageError>;

    async fn save(&self, pair: &KvPair) -> Result<(), StorageError>;

    /// Merge the pair's fields into the stored map; false when absent.
    async fn update(&self, pair: &KvPair) -> Result<bool, StorageError>;

    /// Store `pair`, returning the value it replaced.
    async fn find_and_save(&self, pair: &KvPair) -> Result<Option<Value>, StorageError>;

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError>;

    /// One atomic round trip: inspect the live marker for `request.base` and
    /// arm, keep or clear according to `request.spec`.
    async fn set_marker(&self, request: &MarkerRequest) -> Result<MarkerOutcome, StorageError>;

    /// Set-if-absent with TTL.
    async fn acquire_lock(
        &self,
        key: &str,
        signature: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// Compare-and-delete: only the holder of `signature` may release.
    async fn release_lock(&self, key: &str, signature: &str) -> Result<bool, StorageError>;

    async fn exists_many(&self, ids: &[KvIdType]) -> Result<Vec<bool>, StorageError> {
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            result.push(self.exists(id).await?);
        }
        Ok(result)
    }

    async fn find_many(&self, pairs: &mut KvPairs) -> Result<usize, StorageError> {
        let mut found = 0;
        for pair in pairs.iter_mut() {
            if self.find(pair).await? {
                found += 1;
            }
        }
        Ok(found)
    }

    async fn save_many(&self, pairs: &KvPairs) -> Result<(), StorageError> {
        for pair in pairs.iter() {
            self.save(pair).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[KvIdType]) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Durable tier, addressed through the record's [`KeyInfo`].
///
/// Also the shape of every named write-back target.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Populate `pair.value`; false when no row matches.
    async fn find(&self, pair: &mut KvPair, info: &KeyInfo) -> Result<bool, StorageError>;

    /// Upsert.
    async fn save(&self, pair: &KvPair, info: &KeyInfo) -> Result<(), StorageError>;

    /// False when the row already exists.
    async fn insert(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError>;

    /// False when no row matches.
    async fn update(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError>;

    async fn delete(&self, pair: &KvPair, info: &KeyInfo) -> Result<bool, StorageError>;

    async fn find_many(&self, pairs: &mut KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        let mut found = 0;
        for (pair, info) in pairs.iter_mut().zip(keys.iter()) {
            if self.find(pair, info).await? {
                found += 1;
            }
        }
        Ok(found)
    }

    async fn save_many(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<(), StorageError> {
        check_aligned(pairs, keys)?;
        for (pair, info) in pairs.iter().zip(keys.iter()) {
            self.save(pair, info).await?;
        }
        Ok(())
    }

    async fn insert_many(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        let mut inserted = 0;
        for (pair, info) in pairs.iter().zip(keys.iter()) {
            if self.insert(pair, info).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update_many(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        let mut updated = 0;
        for (pair, info) in pairs.iter().zip(keys.iter()) {
            if self.update(pair, info).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_many(&self, pairs: &KvPairs, keys: &AnyKey) -> Result<usize, StorageError> {
        check_aligned(pairs, keys)?;
        let mut deleted = 0;
        for (pair, info) in pairs.iter().zip(keys.iter()) {
            if self.delete(pair, info).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
pub trait TableMetadata: Send + Sync {
    /// Primary-index column names, `None` for an unknown table.
    async fn primary_indexes(&self, table: &str) -> Result<Option<Vec<String>>, StorageError>;
}

#[async_trait]
pub trait ExpirationFeed: Send + Sync {
    /// Make sure expired-key notifications are enabled. Best effort.
    async fn ensure_notifications(&self) -> Result<(), StorageError>;

    /// Expired key names, in arrival order. Ends when the connection drops.
    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StorageError>;
}
