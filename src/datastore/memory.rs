//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内存数据存储，支持乐观并发事务，用于测试和本地开发。

use super::{AsyncDatastore, AsyncTransaction};
use crate::error::{DatastoreError, DatastoreResult};
use crate::key::{Entity, Key};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// 带版本号的记录，删除后保留版本号
#[derive(Clone, Debug, Default)]
struct Versioned {
    entity: Option<Entity>,
    version: u64,
}

#[derive(Default)]
struct Store {
    records: DashMap<Key, Versioned>,
    /// 写入与提交互斥，使提交时的版本校验和写入原子地完成
    write_lock: Mutex<()>,
    get_calls: AtomicU64,
    put_calls: AtomicU64,
    delete_calls: AtomicU64,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
}

impl Store {
    fn version(&self, key: &Key) -> u64 {
        self.records.get(key).map(|r| r.version).unwrap_or(0)
    }

    fn apply(&self, key: Key, entity: Option<Entity>) {
        let mut record = self.records.entry(key).or_default();
        record.entity = entity;
        record.version += 1;
    }

    fn read(&self, keys: &[Key]) -> HashMap<Key, Entity> {
        keys.iter()
            .filter_map(|key| {
                let record = self.records.get(key)?;
                record.entity.clone().map(|e| (key.clone(), e))
            })
            .collect()
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_writable(&self) -> DatastoreResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(DatastoreError::Unavailable("writes are disabled".to_string()));
        }
        Ok(())
    }
}

/// 进程内存数据存储
///
/// 可克隆，所有克隆共享同一份数据。
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    store: Arc<Store>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 非事务读取调用的次数
    pub fn get_calls(&self) -> u64 {
        self.store.get_calls.load(Ordering::Relaxed)
    }

    pub fn put_calls(&self) -> u64 {
        self.store.put_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> u64 {
        self.store.delete_calls.load(Ordering::Relaxed)
    }

    /// 让之后的写入和提交失败
    pub fn fail_writes(&self, fail: bool) {
        self.store.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// 为每次操作增加固定延迟
    pub fn set_latency(&self, latency: Duration) {
        self.store
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// 不经过任何计数直接读取一条记录
    pub fn peek(&self, key: &Key) -> Option<Entity> {
        self.store.records.get(key).and_then(|r| r.entity.clone())
    }
}

#[async_trait]
impl AsyncDatastore for MemoryDatastore {
    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get(&self, keys: Vec<Key>) -> DatastoreResult<HashMap<Key, Entity>> {
        self.store.get_calls.fetch_add(1, Ordering::Relaxed);
        self.store.simulate_latency().await;
        Ok(self.store.read(&keys))
    }

    #[instrument(skip(self, entities), level = "debug", fields(entity_count = entities.len()))]
    async fn put(&self, entities: Vec<Entity>) -> DatastoreResult<Vec<Key>> {
        self.store.put_calls.fetch_add(1, Ordering::Relaxed);
        self.store.simulate_latency().await;
        let _guard = self.store.write_lock.lock().await;
        self.store.check_writable()?;
        let keys = entities.iter().map(|e| e.key().clone()).collect();
        for entity in entities {
            self.store.apply(entity.key().clone(), Some(entity));
        }
        Ok(keys)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete(&self, keys: Vec<Key>) -> DatastoreResult<()> {
        self.store.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.store.simulate_latency().await;
        let _guard = self.store.write_lock.lock().await;
        self.store.check_writable()?;
        for key in keys {
            self.store.apply(key, None);
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> DatastoreResult<Arc<dyn AsyncTransaction>> {
        Ok(Arc::new(MemoryTransaction {
            store: self.store.clone(),
            active: AtomicBool::new(true),
            state: Mutex::new(TxState::default()),
        }))
    }
}

#[derive(Default)]
struct TxState {
    /// 读取时观察到的版本号
    reads: HashMap<Key, u64>,
    writes: HashMap<Key, Option<Entity>>,
}

/// 乐观并发事务
///
/// 读取记录版本号，写入在提交前只保存在事务内；提交时任何被读取过的记录
/// 版本发生变化都会导致 `ConcurrentModification`。
struct MemoryTransaction {
    store: Arc<Store>,
    active: AtomicBool,
    state: Mutex<TxState>,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> DatastoreResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DatastoreError::TransactionInactive)
        }
    }
}

#[async_trait]
impl AsyncTransaction for MemoryTransaction {
    async fn get(&self, keys: Vec<Key>) -> DatastoreResult<HashMap<Key, Entity>> {
        self.ensure_active()?;
        self.store.simulate_latency().await;
        let mut state = self.state.lock().await;
        let mut result = HashMap::new();
        for key in keys {
            if let Some(pending) = state.writes.get(&key) {
                if let Some(entity) = pending {
                    result.insert(key, entity.clone());
                }
                continue;
            }
            let version = self.store.version(&key);
            state.reads.entry(key.clone()).or_insert(version);
            if let Some(entity) = self.store.read(std::slice::from_ref(&key)).remove(&key) {
                result.insert(key, entity);
            }
        }
        Ok(result)
    }

    async fn put(&self, entities: Vec<Entity>) -> DatastoreResult<Vec<Key>> {
        self.ensure_active()?;
        self.store.simulate_latency().await;
        let mut state = self.state.lock().await;
        let keys = entities.iter().map(|e| e.key().clone()).collect();
        for entity in entities {
            state.writes.insert(entity.key().clone(), Some(entity));
        }
        Ok(keys)
    }

    async fn delete(&self, keys: Vec<Key>) -> DatastoreResult<()> {
        self.ensure_active()?;
        self.store.simulate_latency().await;
        let mut state = self.state.lock().await;
        for key in keys {
            state.writes.insert(key, None);
        }
        Ok(())
    }

    async fn commit(&self) -> DatastoreResult<()> {
        let _guard = self.store.write_lock.lock().await;
        let mut state = self.state.lock().await;
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DatastoreError::TransactionInactive);
        }
        self.store.check_writable()?;

        for (key, observed) in &state.reads {
            if self.store.version(key) != *observed {
                debug!("Commit conflict on {}", key);
                return Err(DatastoreError::ConcurrentModification(key.to_string()));
            }
        }
        for (key, entity) in state.writes.drain() {
            self.store.apply(key, entity);
        }
        Ok(())
    }

    async fn rollback(&self) -> DatastoreResult<()> {
        self.active.store(false, Ordering::Release);
        self.state.lock().await.writes.clear();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
