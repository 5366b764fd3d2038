//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了带延迟缓存失效的事务。

use super::AsyncTransaction;
use crate::cache::EntityMemcache;
use crate::error::{DatastoreError, DatastoreResult};
use crate::future::{DatastoreFuture, TaskFuture};
use crate::key::{Entity, Key};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// 事务状态，`Committed` 和 `RolledBack` 为终态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// 提交前必须完成的操作
#[async_trait]
pub trait Enlisted: Send + Sync {
    async fn resolve(&self) -> DatastoreResult<()>;
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Enlisted for TaskFuture<T> {
    async fn resolve(&self) -> DatastoreResult<()> {
        self.get().await.map(|_| ())
    }
}

struct TxInner {
    state: TransactionState,
    deferred: HashSet<Key>,
    enlisted: Vec<Box<dyn Enlisted>>,
}

/// 带缓存的事务
///
/// 事务内的读取总是绕过缓存；写入不触碰缓存，只记录受影响的键，
/// 在提交成功后统一清空。提交失败时缓存保持不变。
pub struct CachingAsyncTransaction {
    raw: Arc<dyn AsyncTransaction>,
    memcache: Arc<EntityMemcache>,
    inner: Mutex<TxInner>,
}

impl CachingAsyncTransaction {
    pub fn new(raw: Arc<dyn AsyncTransaction>, memcache: Arc<EntityMemcache>) -> Self {
        Self {
            raw,
            memcache,
            inner: Mutex::new(TxInner {
                state: TransactionState::Active,
                deferred: HashSet::new(),
                enlisted: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == TransactionState::Active
    }

    /// 等待提交后清空的键
    pub async fn deferred_keys(&self) -> Vec<Key> {
        self.inner.lock().await.deferred.iter().cloned().collect()
    }

    /// 读取实体，直接访问数据存储
    pub fn get(&self, keys: Vec<Key>) -> DatastoreFuture<HashMap<Key, Entity>> {
        let raw = self.raw.clone();
        DatastoreFuture::spawn(async move { raw.get(keys).await })
    }

    #[instrument(skip(self, entities), level = "debug", fields(entity_count = entities.len()))]
    pub async fn put(&self, entities: Vec<Entity>) -> DatastoreFuture<Vec<Key>> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return DatastoreFuture::failed(DatastoreError::TransactionInactive);
        }
        inner.deferred.extend(entities.iter().map(|e| e.key().clone()));

        let raw = self.raw.clone();
        let task = TaskFuture::spawn(async move { raw.put(entities).await });
        inner.enlisted.push(Box::new(task.clone()));
        DatastoreFuture::Task(task)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    pub async fn delete(&self, keys: Vec<Key>) -> DatastoreFuture<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return DatastoreFuture::failed(DatastoreError::TransactionInactive);
        }
        inner.deferred.extend(keys.iter().cloned());

        let raw = self.raw.clone();
        let task = TaskFuture::spawn(async move { raw.delete(keys).await });
        inner.enlisted.push(Box::new(task.clone()));
        DatastoreFuture::Task(task)
    }

    /// 登记一个必须在提交前完成的操作
    pub async fn enlist(&self, item: impl Enlisted + 'static) -> DatastoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(DatastoreError::TransactionInactive);
        }
        inner.enlisted.push(Box::new(item));
        Ok(())
    }

    /// 提交事务
    ///
    /// 按登记顺序等待所有写入完成后再提交；任何一个写入失败都会中止提交并返回该错误，
    /// 事务保持活动以便回滚。提交成功后清空所有受影响的键；提交失败时错误原样返回，
    /// 缓存不做任何处理。
    #[instrument(skip(self), level = "debug")]
    pub async fn commit(&self) -> DatastoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(DatastoreError::TransactionInactive);
        }

        for enlisted in &inner.enlisted {
            enlisted.resolve().await?;
        }
        inner.enlisted.clear();

        match self.raw.commit().await {
            Ok(()) => {
                inner.state = TransactionState::Committed;
                let keys: Vec<Key> = inner.deferred.drain().collect();
                debug!("Transaction committed, invalidating {} keys", keys.len());
                self.memcache.empty(&keys).await;
                Ok(())
            }
            Err(e) => {
                inner.state = TransactionState::RolledBack;
                inner.deferred.clear();
                warn!("Transaction commit failed, cache left untouched: {}", e);
                Err(e)
            }
        }
    }

    /// 回滚事务，丢弃所有延迟的失效
    #[instrument(skip(self), level = "debug")]
    pub async fn rollback(&self) -> DatastoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Active {
            return Err(DatastoreError::TransactionInactive);
        }
        inner.state = TransactionState::RolledBack;
        inner.deferred.clear();
        inner.enlisted.clear();
        self.raw.rollback().await
    }
}
