//! Redis backend for the distributed tier.
//!
//! Layout:
//! - data: STRING `{hdata}::{type}:{id}` holding the JSON payload
//! - KeyInfo: HASH `{hkey}::{type}`, field `{id}`, JSON value
//! - markers: STRING `{base}::{trace_id}` = spec, `EX |spec|`, plus the
//!   pointer STRING holding the live trace id
//! - locks: STRING `SET NX EX`, released through a compare-and-delete script
//!
//! Marker creation and lock release each run as one Lua script so the
//! test-then-write happens in a single round trip.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client, Script};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{info, trace, warn};

use super::traits::{
    DistributedCacheStore, ExpirationFeed, KeyInfoStore, MarkerOutcome, MarkerRequest,
    StorageError,
};
use crate::config::CacheSyncConfig;
use crate::metrics::LatencyTimer;
use crate::model::{ExpireSpec, KeyInfo, KvIdType, KvPair, KvPairs};
use crate::resilience::retry::{retry, RetryConfig};

/// Pattern matching expired-key events on every database.
pub const EXPIRED_EVENTS: &str = "__keyevent@*__:expired";

const NOTIFY_CONFIG: &str = "notify-keyspace-events";

/// KEYS[1] pointer, KEYS[2] new marker.
/// ARGV[1] base, ARGV[2] trace id, ARGV[3] spec, ARGV[4] ttl, ARGV[5] mode.
const MARKER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[5] == 'clear' then
  if current then redis.call('DEL', ARGV[1] .. '::' .. current) end
  redis.call('DEL', KEYS[1])
  return 'cleared'
end
if current then
  local live = ARGV[1] .. '::' .. current
  if ARGV[5] == 'once' and redis.call('EXISTS', live) == 1 then
    return 'kept'
  end
  redis.call('DEL', live)
end
redis.call('SET', KEYS[2], ARGV[3], 'EX', ARGV[4])
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[4])
return 'armed'
"#;

const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const MERGE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
local doc = cjson.decode(current)
local patch = cjson.decode(ARGV[1])
if type(doc) ~= 'table' or type(patch) ~= 'table' then
  redis.call('SET', KEYS[1], ARGV[1])
  return 1
end
for k, v in pairs(patch) do doc[k] = v end
redis.call('SET', KEYS[1], cjson.encode(doc))
return 1
"#;

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Flags to append to `notify-keyspace-events` so expired events are
/// published: `E` plus one of `A` or `x`.
pub fn missing_notify_flags(current: &str) -> String {
    let mut missing = String::new();
    if !current.contains('E') {
        missing.push('E');
    }
    if !current.contains('A') && !current.contains('x') {
        missing.push('x');
    }
    missing
}

fn parse_json(raw: &str) -> Result<Value, StorageError> {
    Ok(serde_json::from_str(raw)?)
}

async fn connect(url: &str) -> Result<(Client, ConnectionManager), StorageError> {
    let client = Client::open(url).map_err(backend)?;
    // Use startup config: fast-fail on bad config, don't hang forever
    let connection = retry("redis_connect", &RetryConfig::startup(), || async {
        ConnectionManager::new(client.clone()).await
    })
    .await
    .map_err(backend)?;
    Ok((client, connection))
}

pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    hdata_prefix: String,
    marker_script: Script,
    unlock_script: Script,
    merge_script: Script,
}

impl RedisStore {
    pub async fn new(url: &str, config: &CacheSyncConfig) -> Result<Self, StorageError> {
        let (client, connection) = connect(url).await?;
        info!(hdata_prefix = %config.hdata_prefix, "Connected to Redis");
        Ok(Self {
            client,
            connection,
            hdata_prefix: config.hdata_prefix.replace("::", ""),
            marker_script: Script::new(MARKER_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
            merge_script: Script::new(MERGE_SCRIPT),
        })
    }

    /// Connect using `config.redis_url`.
    pub async fn from_config(config: &CacheSyncConfig) -> Result<Self, StorageError> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("redis_url not configured".into()))?;
        Self::new(url, config).await
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// KeyInfo store sharing this connection.
    pub fn key_info_store(&self, config: &CacheSyncConfig) -> RedisKeyInfoStore {
        RedisKeyInfoStore {
            connection: self.connection.clone(),
            hkey_prefix: config.hkey_prefix.replace("::", ""),
        }
    }

    #[inline]
    fn data_key(&self, type_name: &str, id: &str) -> String {
        format!("{}::{}:{}", self.hdata_prefix, type_name, id)
    }

    async fn query<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, redis::RedisError>>,
    {
        let _timer = LatencyTimer::new("redis", operation);
        let conn = self.connection.clone();
        retry(operation, &RetryConfig::query(), || op(conn.clone()))
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl DistributedCacheStore for RedisStore {
    async fn exists(&self, id: &KvIdType) -> Result<bool, StorageError> {
        let key = self.data_key(&id.type_name, &id.id);
        self.query("redis_exists", |mut conn| {
            let key = key.clone();
            async move { conn.exists(&key).await }
        })
        .await
    }

    async fn find(&self, pair: &mut KvPair) -> Result<bool, StorageError> {
        let key = self.data_key(&pair.type_name, &pair.id);
        let raw: Option<String> = self
            .query("redis_get", |mut conn| {
                let key = key.clone();
                async move { conn.get(&key).await }
            })
            .await?;
        match raw {
            Some(raw) => {
                pair.value = parse_json(&raw)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save(&self, pair: &KvPair) -> Result<(), StorageError> {
        let key = self.data_key(&pair.type_name, &pair.id);
        let doc = serde_json::to_string(&pair.value)?;
        self.query("redis_set", |mut conn| {
            let key = key.clone();
            let doc = doc.clone();
            async move { conn.set(&key, &doc).await }
        })
        .await
    }

    async fn update(&self, pair: &KvPair) -> Result<bool, StorageError> {
        let key = self.data_key(&pair.type_name, &pair.id);
        let patch = serde_json::to_string(&pair.value)?;
        let script = &self.merge_script;
        let merged: i64 = self
            .query("redis_merge", |mut conn| {
                let key = key.clone();
                let patch = patch.clone();
                async move { script.key(&key).arg(&patch).invoke_async(&mut conn).await }
            })
            .await?;
        Ok(merged == 1)
    }

    async fn find_and_save(&self, pair: &KvPair) -> Result<Option<Value>, StorageError> {
        let key = self.data_key(&pair.type_name, &pair.id);
        let doc = serde_json::to_string(&pair.value)?;
        let previous: Option<String> = self
            .query("redis_getset", |mut conn| {
                let key = key.clone();
                let doc = doc.clone();
                async move {
                    cmd("SET")
                        .arg(&key)
                        .arg(&doc)
                        .arg("GET")
                        .query_async(&mut conn)
                        .await
                }
            })
            .await?;
        previous.as_deref().map(parse_json).transpose()
    }

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError> {
        let key = self.data_key(&id.type_name, &id.id);
        let removed: u32 = self
            .query("redis_delete", |mut conn| {
                let key = key.clone();
                async move { conn.del(&key).await }
            })
            .await?;
        Ok(removed > 0)
    }

    async fn set_marker(&self, request: &MarkerRequest) -> Result<MarkerOutcome, StorageError> {
        let (mode, ttl) = match request.spec {
            ExpireSpec::Clear => ("clear", 0),
            ExpireSpec::Force(ttl) => ("force", ttl),
            ExpireSpec::Once(ttl) | ExpireSpec::Recurring(ttl) => ("once", ttl),
        };
        let armed_key = request.armed_key();
        let spec = request.spec.to_string();
        let script = &self.marker_script;

        let outcome: String = self
            .query("redis_set_marker", |mut conn| {
                let mut invocation = script.key(&request.pointer);
                invocation
                    .key(&armed_key)
                    .arg(&request.base)
                    .arg(&request.trace_id)
                    .arg(&spec)
                    .arg(ttl)
                    .arg(mode);
                async move { invocation.invoke_async(&mut conn).await }
            })
            .await?;

        match outcome.as_str() {
            "armed" => Ok(MarkerOutcome::Armed),
            "kept" => Ok(MarkerOutcome::Kept),
            "cleared" => Ok(MarkerOutcome::Cleared),
            other => Err(StorageError::Backend(format!(
                "Unexpected marker script reply: {}",
                other
            ))),
        }
    }

    async fn acquire_lock(
        &self,
        key: &str,
        signature: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        // Not retried: a lost OK reply would read as contention, and the lock
        // would then only clear on its own TTL.
        let mut conn = self.connection.clone();
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(signature)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str, signature: &str) -> Result<bool, StorageError> {
        let script = &self.unlock_script;
        let removed: i64 = self
            .query("redis_unlock", |mut conn| {
                let key = key.to_string();
                let signature = signature.to_string();
                async move { script.key(&key).arg(&signature).invoke_async(&mut conn).await }
            })
            .await?;
        Ok(removed == 1)
    }

    /// Pipelined EXISTS.
    async fn exists_many(&self, ids: &[KvIdType]) -> Result<Vec<bool>, StorageError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let keys: Vec<String> = ids.iter().map(|id| self.data_key(&id.type_name, &id.id)).collect();
        self.query("redis_exists_batch", |mut conn| {
            let keys = keys.clone();
            async move {
                let mut pipeline = pipe();
                for key in &keys {
                    pipeline.exists(key);
                }
                pipeline.query_async(&mut conn).await
            }
        })
        .await
    }

    /// Pipelined GET.
    async fn find_many(&self, pairs: &mut KvPairs) -> Result<usize, StorageError> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = pairs
            .iter()
            .map(|p| self.data_key(&p.type_name, &p.id))
            .collect();
        let raws: Vec<Option<String>> = self
            .query("redis_get_batch", |mut conn| {
                let keys = keys.clone();
                async move {
                    let mut pipeline = pipe();
                    for key in &keys {
                        pipeline.get(key);
                    }
                    pipeline.query_async(&mut conn).await
                }
            })
            .await?;

        let mut found = 0;
        for (pair, raw) in pairs.iter_mut().zip(raws) {
            if let Some(raw) = raw {
                pair.value = parse_json(&raw)?;
                found += 1;
            }
        }
        Ok(found)
    }

    /// Pipelined SET.
    async fn save_many(&self, pairs: &KvPairs) -> Result<(), StorageError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let prepared = pairs
            .iter()
            .map(|p| {
                serde_json::to_string(&p.value)
                    .map(|doc| (self.data_key(&p.type_name, &p.id), doc))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.query("redis_set_batch", |mut conn| {
            let prepared = prepared.clone();
            async move {
                let mut pipeline = pipe();
                for (key, doc) in &prepared {
                    pipeline.set(key, doc).ignore();
                }
                pipeline.query_async::<()>(&mut conn).await
            }
        })
        .await
    }
}

#[async_trait]
impl ExpirationFeed for RedisStore {
    async fn ensure_notifications(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let reply: Vec<String> = match cmd("CONFIG")
            .arg("GET")
            .arg(NOTIFY_CONFIG)
            .query_async(&mut conn)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                trace!(error = %e, "CONFIG GET unavailable, assuming notifications are managed externally");
                return Ok(());
            }
        };
        let Some(current) = reply.get(1) else {
            trace!("{} not reported by server", NOTIFY_CONFIG);
            return Ok(());
        };

        let missing = missing_notify_flags(current);
        if missing.is_empty() {
            trace!(current = %current, "Expired-key notifications already enabled");
            return Ok(());
        }

        let updated = format!("{}{}", current, missing);
        let result: Result<(), redis::RedisError> = cmd("CONFIG")
            .arg("SET")
            .arg(NOTIFY_CONFIG)
            .arg(&updated)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => info!(from = %current, to = %updated, "Enabled expired-key notifications"),
            Err(e) => warn!(error = %e, current = %current, "Could not enable expired-key notifications"),
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StorageError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(backend)?;
        pubsub.psubscribe(EXPIRED_EVENTS).await.map_err(backend)?;
        info!(pattern = EXPIRED_EVENTS, "Subscribed to expiration notifications");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "Unreadable expiration payload");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// KeyInfo rows in one hash per type.
#[derive(Clone)]
pub struct RedisKeyInfoStore {
    connection: ConnectionManager,
    hkey_prefix: String,
}

impl RedisKeyInfoStore {
    #[inline]
    fn hash_key(&self, type_name: &str) -> String {
        format!("{}::{}", self.hkey_prefix, type_name)
    }
}

#[async_trait]
impl KeyInfoStore for RedisKeyInfoStore {
    async fn find(&self, id: &KvIdType) -> Result<Option<KeyInfo>, StorageError> {
        let key = self.hash_key(&id.type_name);
        let conn = self.connection.clone();
        let raw: Option<String> = retry("redis_hget", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let field = id.id.clone();
            async move { conn.hget(&key, &field).await }
        })
        .await
        .map_err(backend)?;
        raw.map(|r| serde_json::from_str(&r).map_err(StorageError::from))
            .transpose()
    }

    async fn save(&self, id: &KvIdType, info: &mut KeyInfo) -> Result<(), StorageError> {
        let key = self.hash_key(&id.type_name);
        let doc = serde_json::to_string(info)?;
        let conn = self.connection.clone();
        retry("redis_hset", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let field = id.id.clone();
            let doc = doc.clone();
            async move {
                let _: () = conn.hset(&key, &field, &doc).await?;
                Ok::<(), redis::RedisError>(())
            }
        })
        .await
        .map_err(backend)?;
        info.is_new = false;
        Ok(())
    }

    async fn delete(&self, id: &KvIdType) -> Result<bool, StorageError> {
        let key = self.hash_key(&id.type_name);
        let conn = self.connection.clone();
        let removed: u32 = retry("redis_hdel", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let field = id.id.clone();
            async move { conn.hdel(&key, &field).await }
        })
        .await
        .map_err(backend)?;
        Ok(removed > 0)
    }
}
