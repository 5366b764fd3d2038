//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 带缓存事务的隔离与延迟失效集成测试

use crate::common::{memcache_over, user};
use async_trait::async_trait;
use oxentity::backend::MemoryCacheBackend;
use oxentity::datastore::{
    AsyncDatastore, AsyncTransaction, CachingAsyncDatastore, CachingAsyncTransaction, Enlisted,
    MemoryDatastore, TransactionState,
};
use oxentity::error::DatastoreResult;
use oxentity::{DatastoreError, Entity, EntityMemcache, Key, PendingFutures};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

struct Fixture {
    ds: MemoryDatastore,
    backend: Arc<MemoryCacheBackend>,
    cds: CachingAsyncDatastore,
    memcache: Arc<EntityMemcache>,
    stats: Arc<oxentity::cache::EntityMemcacheStats>,
}

fn fixture() -> Fixture {
    let ds = MemoryDatastore::new();
    let backend = Arc::new(MemoryCacheBackend::new());
    let (memcache, stats) = memcache_over(backend.clone());
    let cds = CachingAsyncDatastore::new(Arc::new(ds.clone()), memcache.clone());
    Fixture {
        ds,
        backend,
        cds,
        memcache,
        stats,
    }
}

/// 按调用顺序记录操作的事务，写入按实体的 `delay_ms` 属性延迟完成
#[derive(Default)]
struct RecordingTransaction {
    log: Mutex<Vec<String>>,
    fail_puts: AtomicBool,
    active: AtomicBool,
}

impl RecordingTransaction {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl AsyncTransaction for RecordingTransaction {
    async fn get(&self, _keys: Vec<Key>) -> DatastoreResult<HashMap<Key, Entity>> {
        Ok(HashMap::new())
    }

    async fn put(&self, entities: Vec<Entity>) -> DatastoreResult<Vec<Key>> {
        let delay = entities
            .iter()
            .filter_map(|e| e.property("delay_ms").and_then(|v| v.as_u64()))
            .max()
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(DatastoreError::Unavailable("put rejected".to_string()));
        }
        for entity in &entities {
            self.record(format!("put {}", entity.key()));
        }
        Ok(entities.iter().map(|e| e.key().clone()).collect())
    }

    async fn delete(&self, keys: Vec<Key>) -> DatastoreResult<()> {
        for key in &keys {
            self.record(format!("delete {}", key));
        }
        Ok(())
    }

    async fn commit(&self) -> DatastoreResult<()> {
        self.active.store(false, Ordering::SeqCst);
        self.record("commit".to_string());
        Ok(())
    }

    async fn rollback(&self) -> DatastoreResult<()> {
        self.active.store(false, Ordering::SeqCst);
        self.record("rollback".to_string());
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// 测试事务内读取完全绕过缓存
#[tokio::test]
async fn test_transactional_reads_bypass_cache() {
    let f = fixture();
    let key = Key::id("User", 1);
    f.ds.put(vec![user(1, "alice")]).await.unwrap();

    let txn = f.cds.new_transaction().await.unwrap();
    let before = f.backend.operation_count();
    let found = txn.get(vec![key.clone()]).get().await.unwrap();

    assert_eq!(found.get(&key), Some(&user(1, "alice")));
    assert_eq!(f.backend.operation_count(), before);
    assert_eq!(f.stats.kind("User").hits + f.stats.kind("User").misses, 0);
    assert!(f.memcache.get_all(&[key.clone()]).await[&key].is_empty());
}

/// 测试回滚后缓存和数据存储都保持不变
#[tokio::test]
async fn test_rollback_leaves_cache_unchanged() {
    let f = fixture();
    let pending = PendingFutures::new();
    let key = Key::id("User", 1);
    f.cds.put(&pending, vec![user(1, "alice")]).get().await.unwrap();

    let txn = f.cds.new_transaction().await.unwrap();
    txn.put(vec![user(1, "eve")]).await.get().await.unwrap();
    assert_eq!(txn.deferred_keys().await, vec![key.clone()]);

    txn.rollback().await.unwrap();
    assert_eq!(txn.state().await, TransactionState::RolledBack);
    assert!(txn.deferred_keys().await.is_empty());
    assert_eq!(
        f.memcache.get_all(&[key.clone()]).await[&key].entity(),
        Some(&user(1, "alice"))
    );
    assert_eq!(f.ds.peek(&key), Some(user(1, "alice")));
}

/// 测试提交成功后清空受影响的键
#[tokio::test]
async fn test_commit_invalidates_written_keys() {
    let f = fixture();
    let pending = PendingFutures::new();
    let written = Key::id("User", 1);
    let deleted = Key::id("User", 2);
    let untouched = Key::id("User", 3);
    f.cds
        .put(&pending, vec![user(1, "alice"), user(2, "bob"), user(3, "carol")])
        .get()
        .await
        .unwrap();

    let txn = f.cds.new_transaction().await.unwrap();
    txn.put(vec![user(1, "alice-v2")]).await;
    txn.delete(vec![deleted.clone()]).await;

    // 提交前缓存仍是旧值
    assert_eq!(
        f.memcache.get_all(&[written.clone()]).await[&written].entity(),
        Some(&user(1, "alice"))
    );

    txn.commit().await.unwrap();
    assert_eq!(txn.state().await, TransactionState::Committed);

    let buckets = f
        .memcache
        .get_all(&[written.clone(), deleted.clone(), untouched.clone()])
        .await;
    assert!(buckets[&written].is_empty());
    assert!(buckets[&deleted].is_empty());
    assert_eq!(buckets[&untouched].entity(), Some(&user(3, "carol")));

    let found = f.cds.get(&pending, &[written.clone(), deleted.clone()]).await.await.unwrap();
    assert_eq!(found.get(&written), Some(&user(1, "alice-v2")));
    assert!(!found.contains_key(&deleted));
}

/// 测试提交冲突时原样返回错误且不触碰缓存
#[tokio::test]
async fn test_commit_conflict_leaves_cache_untouched() {
    let f = fixture();
    let pending = PendingFutures::new();
    let key = Key::id("Account", 1);
    f.cds.put(&pending, vec![Entity::new(key.clone()).with_property("balance", 10)])
        .get()
        .await
        .unwrap();

    let txn = f.cds.new_transaction().await.unwrap();
    txn.get(vec![key.clone()]).get().await.unwrap();

    let concurrent = Entity::new(key.clone()).with_property("balance", 20);
    f.cds.put(&pending, vec![concurrent.clone()]).get().await.unwrap();

    txn.put(vec![Entity::new(key.clone()).with_property("balance", 11)]).await;
    let err = txn.commit().await.unwrap_err();

    assert!(matches!(err, DatastoreError::ConcurrentModification(_)));
    assert_eq!(txn.state().await, TransactionState::RolledBack);
    assert_eq!(
        f.memcache.get_all(&[key.clone()]).await[&key].entity(),
        Some(&concurrent)
    );
    assert_eq!(f.ds.peek(&key), Some(concurrent));
}

/// 测试提交等待所有登记的写入完成后才调用底层提交
#[tokio::test]
async fn test_commit_waits_for_enlisted_writes() {
    let f = fixture();
    let raw = Arc::new(RecordingTransaction::new());
    let txn = CachingAsyncTransaction::new(raw.clone(), f.memcache.clone());

    let slow = user(1, "slow").with_property("delay_ms", 50);
    let fast = user(2, "fast");
    txn.put(vec![slow]).await;
    txn.put(vec![fast]).await;
    txn.delete(vec![Key::id("User", 3)]).await;

    txn.commit().await.unwrap();

    let log = raw.log();
    assert_eq!(log.len(), 4);
    assert_eq!(log.last().map(String::as_str), Some("commit"));
    assert!(log.contains(&format!("put {}", Key::id("User", 1))));
}

/// 在被等待时记录自身名字的登记项，`delay` 模拟完成得更晚的操作
struct ObservedStep {
    name: &'static str,
    delay: Duration,
    raw: Arc<RecordingTransaction>,
}

#[async_trait]
impl Enlisted for ObservedStep {
    async fn resolve(&self) -> DatastoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.raw.record(format!("resolve {}", self.name));
        Ok(())
    }
}

/// 测试登记的操作按登记顺序逐个等待，全部完成后才调用底层提交
#[tokio::test]
async fn test_enlisted_futures_resolve_in_enlistment_order() {
    let f = fixture();
    let raw = Arc::new(RecordingTransaction::new());
    let txn = CachingAsyncTransaction::new(raw.clone(), f.memcache.clone());

    // 先登记的操作完成得更慢
    txn.enlist(ObservedStep {
        name: "F1",
        delay: Duration::from_millis(50),
        raw: raw.clone(),
    })
    .await
    .unwrap();
    txn.enlist(ObservedStep {
        name: "F2",
        delay: Duration::ZERO,
        raw: raw.clone(),
    })
    .await
    .unwrap();

    txn.commit().await.unwrap();

    assert_eq!(raw.log(), vec!["resolve F1", "resolve F2", "commit"]);
    assert!(matches!(
        txn.enlist(ObservedStep {
            name: "late",
            delay: Duration::ZERO,
            raw: raw.clone(),
        })
        .await,
        Err(DatastoreError::TransactionInactive)
    ));
}

/// 测试登记的写入失败时提交中止，事务仍可回滚
#[tokio::test]
async fn test_failed_enlisted_write_aborts_commit() {
    let f = fixture();
    let raw = Arc::new(RecordingTransaction::new());
    raw.fail_puts.store(true, Ordering::SeqCst);
    let txn = CachingAsyncTransaction::new(raw.clone(), f.memcache.clone());

    let put = txn.put(vec![user(1, "alice")]).await;
    let err = txn.commit().await.unwrap_err();

    assert!(matches!(err, DatastoreError::Unavailable(_)));
    assert!(put.get().await.is_err());
    assert!(txn.is_active().await);
    assert!(!raw.log().contains(&"commit".to_string()));

    txn.rollback().await.unwrap();
    assert_eq!(raw.log(), vec!["rollback".to_string()]);
}

/// 测试结束后的事务拒绝继续使用
#[tokio::test]
async fn test_finished_transaction_rejects_operations() {
    let f = fixture();
    let txn = f.cds.new_transaction().await.unwrap();
    txn.put(vec![user(1, "alice")]).await;
    txn.commit().await.unwrap();

    let err = txn.put(vec![user(1, "late")]).await.get().await.unwrap_err();
    assert!(matches!(err, DatastoreError::TransactionInactive));
    let err = txn.delete(vec![Key::id("User", 1)]).await.get().await.unwrap_err();
    assert!(matches!(err, DatastoreError::TransactionInactive));
    assert!(matches!(txn.commit().await, Err(DatastoreError::TransactionInactive)));
    assert!(matches!(txn.rollback().await, Err(DatastoreError::TransactionInactive)));
    assert!(txn.deferred_keys().await.is_empty());
    assert_eq!(f.ds.peek(&Key::id("User", 1)), Some(user(1, "alice")));
}
