// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record identity and payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::key_info::KeyInfo;
use super::ValueMap;

/// Type used when a request does not name one.
pub const DEFAULT_TYPE: &str = "data";

fn default_type() -> String {
    DEFAULT_TYPE.to_string()
}

/// Identity of a record: key plus type (table) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvIdType {
    pub id: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
}

impl KvIdType {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
        }
    }

    /// `{type}:{id}`, the identity fragment shared by every key format.
    pub fn hash_key(&self) -> String {
        format!("{}:{}", self.type_name, self.id)
    }
}

/// Request-scoped record: identity plus an untyped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvPair {
    pub id: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
    #[serde(default)]
    pub value: Value,
}

impl KvPair {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            value: Value::Null,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_map(id: impl Into<String>, type_name: impl Into<String>, map: ValueMap) -> Self {
        Self::new(id, type_name).with_value(Value::Object(map))
    }

    pub fn id_type(&self) -> KvIdType {
        KvIdType::new(self.id.clone(), self.type_name.clone())
    }

    pub fn hash_key(&self) -> String {
        format!("{}:{}", self.type_name, self.id)
    }

    pub fn has_value(&self) -> bool {
        !self.value.is_null()
    }

    /// Payload as a field map. Scalars are wrapped as `{"value": v}`,
    /// null yields `None`.
    pub fn data_map(&self) -> Option<ValueMap> {
        match &self.value {
            Value::Null => None,
            Value::Object(map) => Some(map.clone()),
            other => {
                let mut map = ValueMap::new();
                map.insert("value".to_string(), other.clone());
                Some(map)
            }
        }
    }

    pub fn set_map(&mut self, map: ValueMap) {
        self.value = Value::Object(map);
    }
}

impl From<KvIdType> for KvPair {
    fn from(id: KvIdType) -> Self {
        Self::new(id.id, id.type_name)
    }
}

/// Ordered list of pairs, consumed index-for-index alongside an [`AnyKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvPairs(pub Vec<KvPair>);

impl KvPairs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, pair: KvPair) {
        self.0.push(pair);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KvPair> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, KvPair> {
        self.0.iter_mut()
    }
}

impl From<Vec<KvPair>> for KvPairs {
    fn from(pairs: Vec<KvPair>) -> Self {
        Self(pairs)
    }
}

impl IntoIterator for KvPairs {
    type Item = KvPair;
    type IntoIter = std::vec::IntoIter<KvPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("key index {index} out of range (len {len})")]
pub struct AnyKeyIndexError {
    pub index: usize,
    pub len: usize,
}

/// Metadata list aligned with a [`KvPairs`].
///
/// A request usually declares metadata once and applies it to every pair, so
/// [`AnyKey::get_any`] grows the list one slot at a time by cloning slot 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnyKey(pub Vec<KeyInfo>);

impl AnyKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(info: KeyInfo) -> Self {
        Self(vec![info])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KeyInfo> {
        self.0.get(index)
    }

    pub fn push(&mut self, info: KeyInfo) {
        self.0.push(info);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyInfo> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, KeyInfo> {
        self.0.iter_mut()
    }

    /// Slot `index`, appended on demand when `index == len`.
    pub fn get_any(&mut self, index: usize) -> Result<&mut KeyInfo, AnyKeyIndexError> {
        let len = self.0.len();
        if index > len {
            return Err(AnyKeyIndexError { index, len });
        }
        if index == len {
            let next = match self.0.first() {
                None => KeyInfo::default().mark_new(),
                Some(first) => {
                    let mut clone = first.clone();
                    clone.clear_params();
                    clone.is_new = true;
                    clone
                }
            };
            self.0.push(next);
        }
        Ok(&mut self.0[index])
    }
}

impl From<Vec<KeyInfo>> for AnyKey {
    fn from(infos: Vec<KeyInfo>) -> Self {
        Self(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::key_info::QueryDescriptor;
    use serde_json::json;

    #[test]
    fn test_hash_key() {
        let pair = KvPair::new("42", "user");
        assert_eq!(pair.hash_key(), "user:42");
        assert_eq!(pair.id_type().hash_key(), "user:42");
    }

    #[test]
    fn test_type_defaults_on_deserialize() {
        let pair: KvPair = serde_json::from_str(r#"{"id":"k"}"#).unwrap();
        assert_eq!(pair.type_name, DEFAULT_TYPE);
        assert!(!pair.has_value());
    }

    #[test]
    fn test_data_map_wraps_scalars() {
        let object = KvPair::new("a", "t").with_value(json!({"n": 1}));
        assert_eq!(object.data_map().unwrap()["n"], json!(1));

        let scalar = KvPair::new("a", "t").with_value(json!("hello"));
        assert_eq!(scalar.data_map().unwrap()["value"], json!("hello"));

        assert!(KvPair::new("a", "t").data_map().is_none());
    }

    #[test]
    fn test_get_any_creates_first_slot() {
        let mut keys = AnyKey::new();
        let info = keys.get_any(0).unwrap();
        assert!(info.is_new);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_get_any_clones_first_without_params() {
        let query = QueryDescriptor::new("user", "age > ?", vec![json!(30)]);
        let mut keys = AnyKey::single(KeyInfo::new("user", "30").with_query(query));

        let second = keys.get_any(1).unwrap();
        assert!(second.is_new);
        assert_eq!(second.expire, "30");
        assert!(second.query.as_ref().unwrap().params.is_empty());

        // the original keeps its params
        assert_eq!(keys.get(0).unwrap().query.as_ref().unwrap().params.len(), 1);
        assert!(!keys.get(0).unwrap().is_new);
    }

    #[test]
    fn test_get_any_existing_slot_untouched() {
        let mut keys = AnyKey::single(KeyInfo::new("user", "30"));
        assert!(!keys.get_any(0).unwrap().is_new);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_get_any_rejects_gaps() {
        let mut keys = AnyKey::new();
        let err = keys.get_any(2).unwrap_err();
        assert_eq!(err, AnyKeyIndexError { index: 2, len: 0 });
    }
}
