//! Integration Tests against a real Redis
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - adapter contracts: data, markers, locks, KeyInfo rows
//! - `flow_*` - markers expiring inside Redis and driving the runtime

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cache_sync::storage::memory::{MemoryRelationalStore, MemoryTableMetadata};
use cache_sync::storage::redis::RedisStore;
use cache_sync::storage::traits::MarkerRequest;
use cache_sync::{
    CacheSyncConfig, CacheSyncRuntime, DistributedCacheStore, ExpirationFeed, ExpireSpec,
    KeyInfo, KeyInfoStore, KvIdType, KvPair, KvPairs, MarkerOutcome,
};
use redis::AsyncCommands;

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn config_for(port: u16) -> CacheSyncConfig {
    CacheSyncConfig {
        redis_url: Some(format!("redis://127.0.0.1:{}", port)),
        listener_retry_ms: 200,
        ..Default::default()
    }
}

async fn store_for(port: u16) -> (RedisStore, CacheSyncConfig) {
    let config = config_for(port);
    let store = RedisStore::from_config(&config)
        .await
        .expect("Failed to connect to Redis");
    (store, config)
}

fn marker(base: &str, trace_id: &str, spec: ExpireSpec) -> MarkerRequest {
    MarkerRequest {
        base: base.to_string(),
        pointer: base.replacen("event::", "event_armed::", 1),
        trace_id: trace_id.to_string(),
        spec,
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_data_round_trip() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, _) = store_for(redis.get_host_port_ipv4(6379)).await;

    let pair = KvPair::new("1", "user").with_value(json!({"name": "ada"}));
    store.save(&pair).await.unwrap();
    assert!(store.exists(&pair.id_type()).await.unwrap());

    let patch = KvPair::new("1", "user").with_value(json!({"age": 36}));
    assert!(store.update(&patch).await.unwrap());
    let mut found = KvPair::new("1", "user");
    assert!(store.find(&mut found).await.unwrap());
    assert_eq!(found.value, json!({"name": "ada", "age": 36}));

    let replaced = store
        .find_and_save(&KvPair::new("1", "user").with_value(json!({"name": "grace"})))
        .await
        .unwrap();
    assert_eq!(replaced, Some(json!({"name": "ada", "age": 36})));

    assert!(!store.update(&KvPair::new("missing", "user").with_value(json!({}))).await.unwrap());
    assert!(store.delete(&pair.id_type()).await.unwrap());
    assert!(!store.exists(&pair.id_type()).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_batch_pipelines() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, _) = store_for(redis.get_host_port_ipv4(6379)).await;

    let pairs = KvPairs::from(
        (0..5)
            .map(|i| KvPair::new(i.to_string(), "order").with_value(json!({"n": i})))
            .collect::<Vec<_>>(),
    );
    store.save_many(&pairs).await.unwrap();

    let ids = vec![KvIdType::new("0", "order"), KvIdType::new("9", "order")];
    assert_eq!(store.exists_many(&ids).await.unwrap(), vec![true, false]);

    let mut lookups = KvPairs::from(vec![KvPair::new("3", "order"), KvPair::new("9", "order")]);
    assert_eq!(store.find_many(&mut lookups).await.unwrap(), 1);
    assert_eq!(lookups.iter().next().unwrap().value, json!({"n": 3}));
    assert_eq!(store.delete_many(&ids).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_marker_script() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, _) = store_for(redis.get_host_port_ipv4(6379)).await;
    let mut conn = store.connection();
    let base = "event::user:1";

    let first = marker(base, "t1", ExpireSpec::Once(30));
    assert_eq!(store.set_marker(&first).await.unwrap(), MarkerOutcome::Armed);
    let second = marker(base, "t2", ExpireSpec::Once(600));
    assert_eq!(store.set_marker(&second).await.unwrap(), MarkerOutcome::Kept);
    let ttl: i64 = conn.ttl("event::user:1::t1").await.unwrap();
    assert!(ttl > 0 && ttl <= 30);

    let forced = marker(base, "t3", ExpireSpec::Force(600));
    assert_eq!(store.set_marker(&forced).await.unwrap(), MarkerOutcome::Armed);
    let old: bool = conn.exists("event::user:1::t1").await.unwrap();
    assert!(!old);
    let spec: String = conn.get("event::user:1::t3").await.unwrap();
    assert_eq!(spec, "+600");

    let clear = marker(base, "t4", ExpireSpec::Clear);
    assert_eq!(store.set_marker(&clear).await.unwrap(), MarkerOutcome::Cleared);
    let live: bool = conn.exists("event::user:1::t3").await.unwrap();
    let pointer: bool = conn.exists("event_armed::user:1").await.unwrap();
    assert!(!live && !pointer);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_lock_compare_and_delete() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, _) = store_for(redis.get_host_port_ipv4(6379)).await;
    let ttl = Duration::from_secs(60);

    assert!(store.acquire_lock("lock_event::user:1::t", "a", ttl).await.unwrap());
    assert!(!store.acquire_lock("lock_event::user:1::t", "b", ttl).await.unwrap());
    assert!(!store.release_lock("lock_event::user:1::t", "b").await.unwrap());
    assert!(store.release_lock("lock_event::user:1::t", "a").await.unwrap());
    assert!(store.acquire_lock("lock_event::user:1::t", "b", ttl).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_key_info_rows() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, config) = store_for(redis.get_host_port_ipv4(6379)).await;
    let key_infos = store.key_info_store(&config);

    let id = KvIdType::new("1", "user");
    let mut info = KeyInfo::new("users", "+45").mark_new();
    key_infos.save(&id, &mut info).await.unwrap();
    assert!(!info.is_new);

    let found = key_infos.find(&id).await.unwrap().unwrap();
    assert_eq!(found.table.as_deref(), Some("users"));
    assert_eq!(found.expire, "+45");
    assert!(key_infos.delete(&id).await.unwrap());
    assert!(key_infos.find(&id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_notifications_enabled() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let (store, _) = store_for(redis.get_host_port_ipv4(6379)).await;

    store.ensure_notifications().await.unwrap();
    let mut conn = store.connection();
    let reply: Vec<String> = redis::cmd("CONFIG")
        .arg("GET")
        .arg("notify-keyspace-events")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(reply[1].contains('E'));
    assert!(reply[1].contains('x') || reply[1].contains('A'));
}

// =============================================================================
// Flows
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn flow_marker_expiry_writes_back() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);
    let (store, config) = store_for(port).await;

    let relational = Arc::new(MemoryRelationalStore::new());
    let mut runtime = CacheSyncRuntime::connect(
        config,
        relational.clone(),
        Arc::new(MemoryTableMetadata::new()),
    )
    .await
    .expect("Failed to build runtime");
    runtime.start();
    // let the listener subscribe
    tokio::time::sleep(Duration::from_millis(500)).await;

    let id = KvIdType::new("7", "user");
    store
        .save(&KvPair::from(id.clone()).with_value(json!({"name": "ada"})))
        .await
        .unwrap();
    let ops = runtime.expire_ops();
    let mut info = KeyInfo::new("users", "1").mark_new();
    ops.set_expire_key(&ops.new_context(), &id, &mut info).await.unwrap();

    let mut written = false;
    for _ in 0..50 {
        if relational.row("users", "7").is_some() {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(written, "marker expiry never wrote back");
    assert!(!store.exists(&id).await.unwrap());

    runtime.shutdown().await;
}
