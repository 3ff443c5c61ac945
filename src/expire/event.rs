//! Marker, pointer and lock key formats, and notification parsing.
//!
//! ```text
//! marker   {prefix}::{type}:{id}[::NOOPS.{hash}[={target}]/{spec}]::{trace_id}
//! pointer  {prefix}_armed::{type}:{id}[::NOOPS...]
//! lock     lock_{prefix}::{type}:{id}::{trace_id}
//! ```

use thiserror::Error;

use crate::model::{ExpireSpec, KeyInfo, KvIdType, QUERY_TAG};

const SEP: &str = "::";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed expire event '{raw}': {reason}")]
pub struct EventParseError {
    pub raw: String,
    pub reason: &'static str,
}

impl EventParseError {
    fn new(raw: &str, reason: &'static str) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}

/// Ops tag carried by query-derived markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTag {
    pub content_hash: String,
    pub target: Option<String>,
    pub spec: ExpireSpec,
}

/// One parsed marker expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireEvent {
    pub type_name: String,
    pub id: String,
    pub trace_id: String,
    pub query: Option<QueryTag>,
}

impl ExpireEvent {
    pub fn id_type(&self) -> KvIdType {
        KvIdType::new(self.id.clone(), self.type_name.clone())
    }

    pub fn is_query_derived(&self) -> bool {
        self.query.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    /// `prefix` has any `::` stripped so it stays a single segment.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.replace(SEP, ""),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key the marker for `id` is armed under, minus the trace id.
    pub fn marker_base(&self, id: &KvIdType, info: &KeyInfo, spec: &ExpireSpec) -> String {
        let mut base = format!("{}{}{}", self.prefix, SEP, id.hash_key());
        if let Some(tag) = info.ops_tag() {
            base.push_str(SEP);
            base.push_str(&tag);
            base.push('/');
            base.push_str(&spec.to_string());
        }
        base
    }

    /// Pointer key holding the trace id of the live marker for `base`.
    pub fn pointer(&self, base: &str) -> String {
        let rest = base
            .strip_prefix(&self.prefix)
            .and_then(|r| r.strip_prefix(SEP))
            .unwrap_or(base);
        format!("{}_armed{}{}", self.prefix, SEP, rest)
    }

    pub fn lock_key(&self, event: &ExpireEvent) -> String {
        format!(
            "lock_{}{}{}:{}{}{}",
            self.prefix, SEP, event.type_name, event.id, SEP, event.trace_id
        )
    }

    /// `Ok(None)` for keys outside this prefix: they belong to someone else.
    pub fn parse(&self, raw: &str) -> Result<Option<ExpireEvent>, EventParseError> {
        let segments: Vec<&str> = raw.split(SEP).collect();
        if segments.first() != Some(&self.prefix.as_str()) {
            return Ok(None);
        }

        let (identity, ops, trace_id) = match segments.as_slice() {
            [_, identity, trace_id] => (*identity, None, *trace_id),
            [_, identity, ops, trace_id] => (*identity, Some(*ops), *trace_id),
            _ => return Err(EventParseError::new(raw, "unexpected segment count")),
        };

        let (type_name, id) = identity
            .split_once(':')
            .filter(|(t, i)| !t.is_empty() && !i.is_empty())
            .ok_or_else(|| EventParseError::new(raw, "identity is not type:id"))?;
        if trace_id.is_empty() {
            return Err(EventParseError::new(raw, "missing trace id"));
        }

        let query = ops.map(|ops| Self::parse_ops(raw, ops)).transpose()?;

        Ok(Some(ExpireEvent {
            type_name: type_name.to_string(),
            id: id.to_string(),
            trace_id: trace_id.to_string(),
            query,
        }))
    }

    fn parse_ops(raw: &str, ops: &str) -> Result<QueryTag, EventParseError> {
        let body = ops
            .strip_prefix(QUERY_TAG)
            .and_then(|r| r.strip_prefix('.'))
            .ok_or_else(|| EventParseError::new(raw, "unknown ops tag"))?;
        let (hash_target, spec) = body
            .rsplit_once('/')
            .ok_or_else(|| EventParseError::new(raw, "ops tag without spec"))?;
        let spec = ExpireSpec::parse(spec)
            .map_err(|_| EventParseError::new(raw, "invalid spec in ops tag"))?;
        let (content_hash, target) = match hash_target.split_once('=') {
            Some((hash, target)) if !target.is_empty() => (hash, Some(target.to_string())),
            Some((hash, _)) => (hash, None),
            None => (hash_target, None),
        };
        if content_hash.is_empty() {
            return Err(EventParseError::new(raw, "ops tag without content hash"));
        }
        Ok(QueryTag {
            content_hash: content_hash.to_string(),
            target,
            spec,
        })
    }
}
