//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis后端CAS语义集成测试，需要可用的Redis实例

use crate::common::{setup_logging, unique_namespace, user};
use oxentity::backend::{CacheBackend, CasPut, CasToken, RedisBackend};
use oxentity::cache::{ConfigCacheControl, EntityMemcache};
use oxentity::utils::{create_standalone_config, is_redis_available, is_redis_available_url};
use oxentity::Key;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

async fn connect() -> Option<RedisBackend> {
    if !is_redis_available() {
        return None;
    }
    let config = create_standalone_config();
    if !is_redis_available_url(config.connection_string.expose_secret()).await {
        println!("Redis not available, skipping");
        return None;
    }
    setup_logging();
    RedisBackend::new(&config).await.ok()
}

fn cas(token: CasToken, value: &[u8], expiry: Option<Duration>) -> CasPut {
    CasPut {
        token,
        value: Some(value.to_vec()),
        expiry,
    }
}

/// 测试Redis上的条件写入只接受最新令牌
#[tokio::test]
async fn test_redis_cas_accepts_only_latest_token() {
    let Some(backend) = connect().await else {
        return;
    };
    let key = unique_namespace("cas");

    let initial = backend.get_identifiables(&[key.clone()]).await.unwrap();
    let token = initial[&key].token();
    assert!(initial[&key].value().is_none());

    let first = HashMap::from([(key.clone(), cas(token, b"one", Some(Duration::from_secs(60))))]);
    assert!(backend.put_if_untouched(&first).await.unwrap().contains(&key));

    // 同一令牌的第二次写入被拒绝
    let second = HashMap::from([(key.clone(), cas(token, b"two", Some(Duration::from_secs(60))))]);
    assert!(backend.put_if_untouched(&second).await.unwrap().is_empty());

    let current = backend.get_identifiables(&[key.clone()]).await.unwrap();
    assert_eq!(current[&key].value().map(Vec::as_slice), Some(&b"one"[..]));
    assert_ne!(current[&key].token(), token);

    backend.delete_all(&[key]).await.unwrap();
}

/// 测试清空会使之前的令牌失效，且清空后的键不出现在普通读取中
#[tokio::test]
async fn test_redis_empty_bumps_version() {
    let Some(backend) = connect().await else {
        return;
    };
    let key = unique_namespace("empty");

    let token = backend.get_identifiables(&[key.clone()]).await.unwrap()[&key].token();
    backend
        .put_all(&HashMap::from([(key.clone(), None)]))
        .await
        .unwrap();

    let stale = HashMap::from([(key.clone(), cas(token, b"stale", None))]);
    assert!(backend.put_if_untouched(&stale).await.unwrap().is_empty());
    assert!(backend.get_all(&[key.clone()]).await.unwrap().is_empty());

    let fresh = backend.get_identifiables(&[key.clone()]).await.unwrap();
    assert!(fresh[&key].value().is_none());
    assert_ne!(fresh[&key].token(), token);

    backend.delete_all(&[key]).await.unwrap();
}

/// 测试值过期后版本号仍然保留
#[tokio::test]
async fn test_redis_expired_value_keeps_version() {
    let Some(backend) = connect().await else {
        return;
    };
    let key = unique_namespace("expiry");

    let token = backend.get_identifiables(&[key.clone()]).await.unwrap()[&key].token();
    let put = HashMap::from([(key.clone(), cas(token, b"short", Some(Duration::from_secs(1))))]);
    assert!(backend.put_if_untouched(&put).await.unwrap().contains(&key));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let after = backend.get_identifiables(&[key.clone()]).await.unwrap();
    assert!(after[&key].value().is_none());
    // 过期前读取的令牌不能再写入
    let stale = HashMap::from([(key.clone(), cas(token, b"stale", None))]);
    assert!(backend.put_if_untouched(&stale).await.unwrap().is_empty());

    backend.delete_all(&[key]).await.unwrap();
}

/// 测试删除后之前读取的令牌不能重新生效
#[tokio::test]
async fn test_redis_delete_keeps_version() {
    let Some(backend) = connect().await else {
        return;
    };
    let key = unique_namespace("delete");

    let token = backend.get_identifiables(&[key.clone()]).await.unwrap()[&key].token();
    let first = HashMap::from([(key.clone(), cas(token, b"one", None))]);
    assert!(backend.put_if_untouched(&first).await.unwrap().contains(&key));

    backend.delete_all(&[key.clone()]).await.unwrap();

    let stale = HashMap::from([(key.clone(), cas(token, b"stale", None))]);
    assert!(backend.put_if_untouched(&stale).await.unwrap().is_empty());
    assert!(backend.get_all(&[key.clone()]).await.unwrap().is_empty());
}

/// 测试多键批量操作按命令顺序合并结果
#[tokio::test]
async fn test_redis_multi_key_batch() {
    let Some(backend) = connect().await else {
        return;
    };
    let keys: Vec<String> = (0..3).map(|_| unique_namespace("batch")).collect();
    let values: HashMap<String, Option<Vec<u8>>> = keys
        .iter()
        .map(|k| (k.clone(), Some(k.as_bytes().to_vec())))
        .collect();

    backend.put_all(&values).await.unwrap();
    let found = backend.get_all(&keys).await.unwrap();
    for key in &keys {
        assert_eq!(found[key], key.as_bytes().to_vec());
    }

    backend.delete_all(&keys).await.unwrap();
    assert!(backend.get_all(&keys).await.unwrap().is_empty());
}

/// 测试基于Redis的实体缓存完整往返
#[tokio::test]
async fn test_redis_memcache_round_trip() {
    let Some(backend) = connect().await else {
        return;
    };
    let memcache = EntityMemcache::with_defaults(
        unique_namespace("memcache"),
        Arc::new(backend),
        Arc::new(ConfigCacheControl::cache_everything(60)),
    );
    let key = Key::id("User", 1);

    memcache.put_entities(&[user(1, "alice")]).await;
    assert_eq!(
        memcache.get_all(&[key.clone()]).await[&key].entity(),
        Some(&user(1, "alice"))
    );

    memcache.empty(&[key.clone()]).await;
    assert!(memcache.get_all(&[key.clone()]).await[&key].is_empty());

    memcache
        .backend()
        .delete_all(&[memcache.key_for(&key)])
        .await
        .unwrap();
}
