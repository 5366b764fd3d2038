//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 带缓存数据存储的读穿透与写穿透集成测试

use crate::common::{memcache_over, setup_logging, user, ReadFailingBackend};
use oxentity::backend::MemoryCacheBackend;
use oxentity::config::PutPolicy;
use oxentity::datastore::{AsyncDatastore, CachingAsyncDatastore, MemoryDatastore};
use oxentity::{DatastoreError, EntityMemcache, Key, PendingFutures};
use std::sync::Arc;

#[path = "../common/mod.rs"]
mod common;

fn caching_datastore() -> (MemoryDatastore, CachingAsyncDatastore, Arc<EntityMemcache>) {
    let ds = MemoryDatastore::new();
    let (memcache, _) = memcache_over(Arc::new(MemoryCacheBackend::new()));
    let cds = CachingAsyncDatastore::new(Arc::new(ds.clone()), memcache.clone());
    (ds, cds, memcache)
}

async fn cached_entity(memcache: &EntityMemcache, key: &Key) -> Option<oxentity::Entity> {
    memcache.get_all(&[key.clone()]).await[key].entity().cloned()
}

/// 测试未命中时读取数据存储并回填缓存，第二次读取命中缓存
#[tokio::test]
async fn test_read_through_populates_cache() {
    setup_logging();
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::named("read_through");
    let key = Key::id("User", 1);
    ds.put(vec![user(1, "alice")]).await.unwrap();

    let found = cds.get(&pending, &[key.clone()]).await.get().await.unwrap();
    assert_eq!(found.get(&key), Some(&user(1, "alice")));
    assert_eq!(ds.get_calls(), 1);
    assert!(pending.is_empty());
    assert_eq!(cached_entity(&memcache, &key).await, Some(user(1, "alice")));

    let again = cds.get(&pending, &[key.clone()]).await;
    assert!(again.is_done().await);
    assert_eq!(again.get().await.unwrap().get(&key), Some(&user(1, "alice")));
    assert_eq!(ds.get_calls(), 1);
}

/// 测试不存在的实体被负缓存，之后的读取不再访问数据存储
#[tokio::test]
async fn test_missing_entity_is_negatively_cached() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    let key = Key::name("User", "nobody");

    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert!(found.is_empty());
    assert!(memcache.get_all(&[key.clone()]).await[&key].is_negative());

    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert!(found.is_empty());
    assert_eq!(ds.get_calls(), 1);
}

/// 测试混合命中与未命中只为未命中的键访问数据存储
#[tokio::test]
async fn test_partial_hits_merge_with_datastore_results() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    ds.put(vec![user(1, "alice"), user(2, "bob")]).await.unwrap();
    memcache.put_entities(&[user(1, "alice")]).await;

    let keys = [Key::id("User", 1), Key::id("User", 2), Key::id("User", 3)];
    let found = cds.get(&pending, &keys).await.await.unwrap();
    pending.flush().await;

    assert_eq!(found.len(), 2);
    assert_eq!(found.get(&keys[1]), Some(&user(2, "bob")));
    assert_eq!(ds.get_calls(), 1);
    assert_eq!(cached_entity(&memcache, &keys[1]).await, Some(user(2, "bob")));
    assert!(memcache.get_all(&[keys[2].clone()]).await[&keys[2]].is_negative());
}

/// 测试写穿透后读取直接命中缓存
#[tokio::test]
async fn test_write_through_caches_written_entities() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);

    let written = cds.put(&pending, vec![user(1, "alice")]).get().await.unwrap();
    assert_eq!(written, vec![key.clone()]);
    assert_eq!(cached_entity(&memcache, &key).await, Some(user(1, "alice")));

    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert_eq!(found.get(&key), Some(&user(1, "alice")));
    assert_eq!(ds.get_calls(), 0);
}

/// 测试失效策略下写入只清空缓存
#[tokio::test]
async fn test_invalidate_policy_empties_cache() {
    let (ds, cds, memcache) = caching_datastore();
    let cds = cds.with_put_policy(PutPolicy::Invalidate);
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);
    memcache.put_entities(&[user(1, "old")]).await;

    cds.put(&pending, vec![user(1, "new")]).get().await.unwrap();

    assert!(memcache.get_all(&[key.clone()]).await[&key].is_empty());
    assert_eq!(ds.peek(&key), Some(user(1, "new")));
}

/// 测试删除成功后清空缓存
#[tokio::test]
async fn test_delete_empties_cache() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);
    cds.put(&pending, vec![user(1, "alice")]).get().await.unwrap();

    cds.delete(&pending, vec![key.clone()]).get().await.unwrap();

    assert!(memcache.get_all(&[key.clone()]).await[&key].is_empty());
    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert!(found.is_empty());
    assert_eq!(ds.get_calls(), 1);
}

/// 测试写入失败时缓存保持不变
#[tokio::test]
async fn test_failed_write_leaves_cache_untouched() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);
    cds.put(&pending, vec![user(1, "alice")]).get().await.unwrap();

    ds.fail_writes(true);
    let err = cds.put(&pending, vec![user(1, "mallory")]).get().await.unwrap_err();
    assert!(matches!(err, DatastoreError::Unavailable(_)));
    let err = cds.delete(&pending, vec![key.clone()]).get().await.unwrap_err();
    assert!(matches!(err, DatastoreError::Unavailable(_)));

    assert_eq!(cached_entity(&memcache, &key).await, Some(user(1, "alice")));
    assert!(pending.is_empty());
}

/// 测试没有被等待的写入由 flush 完成其缓存回调
#[tokio::test]
async fn test_flush_completes_unawaited_writes() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::named("fire_and_forget");
    let key = Key::id("User", 1);

    let _unobserved = cds.put(&pending, vec![user(1, "alice")]);
    assert_eq!(pending.len(), 1);

    pending.flush().await;
    assert!(pending.is_empty());
    assert_eq!(ds.peek(&key), Some(user(1, "alice")));
    assert_eq!(cached_entity(&memcache, &key).await, Some(user(1, "alice")));

    // 再次 flush 不做任何事
    pending.flush().await;
    assert!(pending.is_empty());
}

/// 测试与写入交错的过期回填不会留在缓存中
#[tokio::test]
async fn test_stale_population_loses_to_later_write() {
    let (ds, cds, memcache) = caching_datastore();
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);
    ds.put(vec![user(1, "v1")]).await.unwrap();

    let read = cds.get(&pending, &[key.clone()]).await;
    // 让读取先完成，此时它观察到的是 v1
    tokio::task::yield_now().await;

    cds.put(&pending, vec![user(1, "v2")]).get().await.unwrap();
    read.get().await.unwrap();
    pending.flush().await;

    assert_ne!(cached_entity(&memcache, &key).await, Some(user(1, "v1")));
    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert_eq!(found.get(&key), Some(&user(1, "v2")));
}

/// 测试写穿透时读取令牌失败，写入成功后仍清空旧缓存
#[tokio::test]
async fn test_write_without_tokens_empties_stale_entry() {
    let ds = MemoryDatastore::new();
    let backend = Arc::new(ReadFailingBackend::default());
    let (memcache, _) = memcache_over(backend.clone());
    let cds = CachingAsyncDatastore::new(Arc::new(ds.clone()), memcache.clone());
    let pending = PendingFutures::named("untokened_write");
    let key = Key::id("User", 1);

    cds.put(&pending, vec![user(1, "v1")]).get().await.unwrap();
    assert_eq!(cached_entity(&memcache, &key).await, Some(user(1, "v1")));

    backend.fail_reads(true);
    cds.put(&pending, vec![user(1, "v2")]).get().await.unwrap();
    pending.flush().await;
    backend.fail_reads(false);

    assert_eq!(ds.peek(&key), Some(user(1, "v2")));
    assert!(memcache.get_all(&[key.clone()]).await[&key].is_empty());
    let found = cds.get(&pending, &[key.clone()]).await.await.unwrap();
    assert_eq!(found.get(&key), Some(&user(1, "v2")));
}
