// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity and metadata records shared by every tier.

pub mod expire;
pub mod key_info;
pub mod kv_pair;

pub use expire::{ExpireSpec, ExpireSpecError};
pub use key_info::{KeyInfo, QueryDescriptor, DEFAULT_EXPIRE, QUERY_TAG};
pub use kv_pair::{AnyKey, AnyKeyIndexError, KvIdType, KvPair, KvPairs, DEFAULT_TYPE};

/// Untyped record payload.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;
