// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key metadata.
//!
//! A [`KeyInfo`] is created the first time a key is resolved and describes
//! where the record lives in the database (table + query) and how long it may
//! stay in faster tiers (the signed expire spec). It is persisted to the
//! KeyInfo store only when freshly derived (`is_new`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::expire::{ExpireSpec, ExpireSpecError};

/// Expire spec applied when a record does not declare one.
pub const DEFAULT_EXPIRE: &str = "180";

/// Tag marking query-derived markers in the distributed store.
pub const QUERY_TAG: &str = "NOOPS";

fn default_expire() -> String {
    DEFAULT_EXPIRE.to_string()
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Opaque query produced by the request filter parser: a SQL clause, its
/// bound parameters and a content hash identifying the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub clause: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub content_hash: String,
}

impl QueryDescriptor {
    pub fn new(table: &str, clause: impl Into<String>, params: Vec<Value>) -> Self {
        let clause = clause.into();
        let content_hash = Self::hash(table, &clause, &params);
        Self { clause, params, content_hash }
    }

    /// Equality clause over the given primary-index columns.
    pub fn for_primary_key(table: &str, indexes: &[String], values: &[&str]) -> Self {
        let clause = indexes
            .iter()
            .map(|name| format!("{} = ?", name))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = values
            .iter()
            .take(indexes.len())
            .map(|v| Value::String((*v).to_string()))
            .collect();
        Self::new(table, clause, params)
    }

    fn hash(table: &str, clause: &str, params: &[Value]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(table.as_bytes());
        hasher.update(b"\0");
        hasher.update(clause.as_bytes());
        for param in params {
            hasher.update(b"\0");
            hasher.update(param.to_string().as_bytes());
        }
        // 16 bytes is plenty to tell filters apart and keeps marker keys short
        hex::encode(&hasher.finalize()[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Backing table (defaults to the pair's type when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Signed expire spec, kept as written.
    #[serde(default = "default_expire")]
    pub expire: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_indexes: Vec<String>,
    /// Key represents a filter result rather than a single record identity.
    #[serde(default)]
    pub query_derived: bool,
    /// Named write-back target; `None` means the standard relational store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_target: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    /// Derived during this request and not yet persisted.
    #[serde(skip)]
    pub is_new: bool,
}

impl Default for KeyInfo {
    fn default() -> Self {
        Self {
            table: None,
            expire: default_expire(),
            query: None,
            primary_indexes: Vec::new(),
            query_derived: false,
            write_target: None,
            created_at: now_millis(),
            is_new: false,
        }
    }
}

impl KeyInfo {
    pub fn new(table: impl Into<String>, expire: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            expire: expire.into(),
            ..Default::default()
        }
    }

    /// Metadata reconstructed from a table's primary index and the values
    /// embedded in a key. Used for query-derived keys, which have no
    /// persisted row.
    pub fn for_primary_key(table: &str, indexes: Vec<String>, values: &[&str]) -> Self {
        let query = QueryDescriptor::for_primary_key(table, &indexes, values);
        Self {
            table: Some(table.to_string()),
            query: Some(query),
            primary_indexes: indexes,
            query_derived: true,
            ..Default::default()
        }
    }

    /// Minimal stand-in used when the primary index cannot be resolved.
    pub fn placeholder() -> Self {
        Self {
            query_derived: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_expire(mut self, expire: impl Into<String>) -> Self {
        self.expire = expire.into();
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: QueryDescriptor) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn with_write_target(mut self, target: impl Into<String>) -> Self {
        self.write_target = Some(target.into());
        self
    }

    #[must_use]
    pub fn mark_new(mut self) -> Self {
        self.is_new = true;
        self
    }

    pub fn expire_spec(&self) -> Result<ExpireSpec, ExpireSpecError> {
        ExpireSpec::parse(&self.expire)
    }

    /// Magnitude of the expire spec in seconds; 0 for clear or unparsable specs.
    #[must_use]
    pub fn expire_ttl(&self) -> u64 {
        self.expire_spec().map(|s| s.ttl_secs()).unwrap_or(0)
    }

    /// Table to address, falling back to the pair type.
    pub fn table_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.table.as_deref().unwrap_or(fallback)
    }

    /// Content hash of the attached query, if any.
    pub fn query_key(&self) -> Option<&str> {
        self.query.as_ref().map(|q| q.content_hash.as_str())
    }

    /// Ops tag embedded in query-derived marker keys:
    /// `NOOPS.{content_hash}[={target}]`.
    pub fn ops_tag(&self) -> Option<String> {
        if !self.query_derived {
            return None;
        }
        let mut tag = format!("{}.{}", QUERY_TAG, self.query_key().unwrap_or("none"));
        if let Some(ref target) = self.write_target {
            tag.push('=');
            tag.push_str(target);
        }
        Some(tag)
    }

    /// Drop request-specific query parameters (used when cloning metadata
    /// for another key of the same batch).
    pub fn clear_params(&mut self) {
        if let Some(ref mut query) = self.query {
            query.params.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_expire() {
        let info = KeyInfo::default();
        assert_eq!(info.expire, "180");
        assert_eq!(info.expire_ttl(), 180);
        assert!(!info.is_new);
        assert!(info.created_at > 0);
    }

    #[test]
    fn test_expire_ttl_is_magnitude() {
        assert_eq!(KeyInfo::new("user", "-45").expire_ttl(), 45);
        assert_eq!(KeyInfo::new("user", "+45").expire_ttl(), 45);
        assert_eq!(KeyInfo::new("user", "0").expire_ttl(), 0);
        assert_eq!(KeyInfo::new("user", "bogus").expire_ttl(), 0);
    }

    #[test]
    fn test_is_new_not_serialized() {
        let info = KeyInfo::new("user", "30").mark_new();
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("is_new"));

        let back: KeyInfo = serde_json::from_str(&json).unwrap();
        assert!(!back.is_new);
        assert_eq!(back.table.as_deref(), Some("user"));
        assert_eq!(back.expire, "30");
    }

    #[test]
    fn test_missing_fields_deserialize_with_defaults() {
        let back: KeyInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(back.expire, DEFAULT_EXPIRE);
        assert!(back.table.is_none());
        assert!(!back.query_derived);
    }

    #[test]
    fn test_primary_key_reconstruction_single() {
        let info = KeyInfo::for_primary_key("user", vec!["id".into()], &["42"]);
        let query = info.query.as_ref().unwrap();
        assert_eq!(query.clause, "id = ?");
        assert_eq!(query.params, vec![json!("42")]);
        assert!(info.query_derived);
        assert_eq!(info.table.as_deref(), Some("user"));
    }

    #[test]
    fn test_primary_key_reconstruction_composite() {
        let info = KeyInfo::for_primary_key(
            "order_item",
            vec!["order_id".into(), "line".into()],
            &["7", "2", "extra"],
        );
        let query = info.query.as_ref().unwrap();
        assert_eq!(query.clause, "order_id = ? AND line = ?");
        assert_eq!(query.params, vec![json!("7"), json!("2")]);
    }

    #[test]
    fn test_content_hash_is_stable_and_discriminating() {
        let a = QueryDescriptor::new("user", "age > ?", vec![json!(30)]);
        let b = QueryDescriptor::new("user", "age > ?", vec![json!(30)]);
        let c = QueryDescriptor::new("user", "age > ?", vec![json!(31)]);
        let d = QueryDescriptor::new("admin", "age > ?", vec![json!(30)]);
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
        assert_ne!(a.content_hash, d.content_hash);
        assert_eq!(a.content_hash.len(), 32);
    }

    #[test]
    fn test_ops_tag() {
        let identity = KeyInfo::new("user", "30");
        assert!(identity.ops_tag().is_none());

        let derived = KeyInfo::for_primary_key("user", vec!["id".into()], &["1"]);
        let hash = derived.query_key().unwrap().to_string();
        assert_eq!(derived.ops_tag().unwrap(), format!("NOOPS.{}", hash));

        let targeted = derived.with_write_target("archive");
        assert_eq!(targeted.ops_tag().unwrap(), format!("NOOPS.{}=archive", hash));

        assert_eq!(KeyInfo::placeholder().ops_tag().unwrap(), "NOOPS.none");
    }

    #[test]
    fn test_clear_params() {
        let mut info = KeyInfo::for_primary_key("user", vec!["id".into()], &["1"]);
        info.clear_params();
        assert!(info.query.unwrap().params.is_empty());
    }

    #[test]
    fn test_table_or() {
        assert_eq!(KeyInfo::default().table_or("fallback"), "fallback");
        assert_eq!(KeyInfo::new("user", "1").table_or("fallback"), "user");
    }
}
