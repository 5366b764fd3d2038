//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了带读穿透和写穿透缓存的数据存储装饰器。

use super::transaction::CachingAsyncTransaction;
use super::AsyncDatastore;
use crate::cache::{Bucket, EntityMemcache};
use crate::config::PutPolicy;
use crate::error::{DatastoreResult, Result};
use crate::future::{DatastoreFuture, OnSuccess, PendingFutures, SuccessTrigger, TriggerFuture};
use crate::key::{Entity, Key};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

/// 用读取结果填充未命中的缓存桶
struct PopulateBuckets {
    memcache: Arc<EntityMemcache>,
    buckets: Vec<Bucket>,
}

#[async_trait]
impl OnSuccess<HashMap<Key, Entity>> for PopulateBuckets {
    async fn success(&self, found: &HashMap<Key, Entity>) -> Result<()> {
        let mut buckets = self.buckets.clone();
        for bucket in &mut buckets {
            let next = found.get(bucket.key()).cloned();
            bucket.set_next(next);
        }
        self.memcache.put_all(&buckets).await;
        Ok(())
    }
}

/// 把写入成功的实体通过CAS放入缓存
///
/// 令牌在写入数据存储之前读取，由派发的操作放入 `staged`。读取令牌失败的键
/// 没有可用的令牌，策略上可缓存时改为清空，避免旧实体留在缓存中。
struct WriteThrough {
    memcache: Arc<EntityMemcache>,
    staged: Arc<OnceLock<Vec<Bucket>>>,
}

#[async_trait]
impl OnSuccess<Vec<Key>> for WriteThrough {
    async fn success(&self, written: &Vec<Key>) -> Result<()> {
        let staged: HashMap<&Key, &Bucket> = self
            .staged
            .get()
            .map(|buckets| buckets.iter().map(|b| (b.key(), b)).collect())
            .unwrap_or_default();
        let written: HashSet<&Key> = written.iter().collect();

        let mut buckets = Vec::new();
        let mut untokened = Vec::new();
        for key in written {
            match staged.get(key) {
                Some(bucket) if bucket.is_cacheable() => buckets.push((*bucket).clone()),
                _ if self.memcache.is_cacheable(key) => untokened.push(key.clone()),
                _ => {}
            }
        }

        self.memcache.put_all(&buckets).await;
        if !untokened.is_empty() {
            debug!("No cache token for {} written keys, emptying them", untokened.len());
            self.memcache.empty(&untokened).await;
        }
        Ok(())
    }
}

/// 清空受影响的缓存键
struct Invalidate {
    memcache: Arc<EntityMemcache>,
    keys: Vec<Key>,
}

#[async_trait]
impl<T: Send + Sync + 'static> OnSuccess<T> for Invalidate {
    async fn success(&self, _value: &T) -> Result<()> {
        self.memcache.empty(&self.keys).await;
        Ok(())
    }
}

/// 带缓存的异步数据存储
///
/// - `get` 先查缓存，只为未命中的键访问数据存储，并在读取成功后回填缓存；
/// - `put`/`delete` 成功后更新或清空缓存，失败时不触碰缓存；
/// - 缓存回调登记在调用者提供的 [`PendingFutures`] 中，工作单元结束时需要 `flush`。
#[derive(Clone)]
pub struct CachingAsyncDatastore {
    raw: Arc<dyn AsyncDatastore>,
    memcache: Arc<EntityMemcache>,
    put_policy: PutPolicy,
}

impl CachingAsyncDatastore {
    pub fn new(raw: Arc<dyn AsyncDatastore>, memcache: Arc<EntityMemcache>) -> Self {
        Self {
            raw,
            memcache,
            put_policy: PutPolicy::default(),
        }
    }

    pub fn with_put_policy(mut self, put_policy: PutPolicy) -> Self {
        self.put_policy = put_policy;
        self
    }

    pub fn put_policy(&self) -> PutPolicy {
        self.put_policy
    }

    pub fn memcache(&self) -> &Arc<EntityMemcache> {
        &self.memcache
    }

    pub fn raw(&self) -> &Arc<dyn AsyncDatastore> {
        &self.raw
    }

    /// 批量读取实体
    ///
    /// 缓存命中的实体直接返回，负缓存视为不存在；其余键由一次派发的数据存储读取获得。
    /// 全部命中时返回已就绪的 future。
    #[instrument(skip(self, pending, keys), level = "debug", fields(key_count = keys.len()))]
    pub async fn get(
        &self,
        pending: &PendingFutures,
        keys: &[Key],
    ) -> DatastoreFuture<HashMap<Key, Entity>> {
        let buckets = self.memcache.get_all(keys).await;

        let mut cached = HashMap::new();
        let mut misses = Vec::new();
        for (key, bucket) in buckets {
            if let Some(entity) = bucket.entity() {
                cached.insert(key, entity.clone());
            } else if !bucket.is_negative() {
                misses.push(bucket);
            }
        }

        if misses.is_empty() {
            return DatastoreFuture::ready(cached);
        }
        debug!("{} cache misses, {} hits", misses.len(), cached.len());

        let miss_keys: Vec<Key> = misses.iter().map(|b| b.key().clone()).collect();
        let raw = self.raw.clone();
        let operation = async move {
            let mut found = raw.get(miss_keys).await?;
            found.extend(cached);
            Ok(found)
        };

        let cacheable: Vec<Bucket> = misses.into_iter().filter(|b| b.is_cacheable()).collect();
        if cacheable.is_empty() {
            return DatastoreFuture::spawn(operation);
        }
        DatastoreFuture::Triggered(TriggerFuture::spawn(
            pending,
            operation,
            SuccessTrigger::new(PopulateBuckets {
                memcache: self.memcache.clone(),
                buckets: cacheable,
            }),
        ))
    }

    /// 批量写入实体，成功后按写入策略更新缓存
    #[instrument(skip(self, pending, entities), level = "debug", fields(entity_count = entities.len()))]
    pub fn put(&self, pending: &PendingFutures, entities: Vec<Entity>) -> DatastoreFuture<Vec<Key>> {
        let raw = self.raw.clone();
        match self.put_policy {
            PutPolicy::WriteThrough => {
                let staged = Arc::new(OnceLock::new());
                let memcache = self.memcache.clone();
                let slot = staged.clone();
                let operation = async move {
                    let _ = slot.set(memcache.prepare_entities(&entities).await);
                    raw.put(entities).await
                };
                DatastoreFuture::Triggered(TriggerFuture::spawn(
                    pending,
                    operation,
                    SuccessTrigger::new(WriteThrough {
                        memcache: self.memcache.clone(),
                        staged,
                    }),
                ))
            }
            PutPolicy::Invalidate => {
                let keys = entities.iter().map(|e| e.key().clone()).collect();
                DatastoreFuture::Triggered(TriggerFuture::spawn(
                    pending,
                    async move { raw.put(entities).await },
                    SuccessTrigger::new(Invalidate {
                        memcache: self.memcache.clone(),
                        keys,
                    }),
                ))
            }
        }
    }

    /// 批量删除，成功后清空缓存
    #[instrument(skip(self, pending, keys), level = "debug", fields(key_count = keys.len()))]
    pub fn delete(&self, pending: &PendingFutures, keys: Vec<Key>) -> DatastoreFuture<()> {
        let raw = self.raw.clone();
        let hook = Invalidate {
            memcache: self.memcache.clone(),
            keys: keys.clone(),
        };
        DatastoreFuture::Triggered(TriggerFuture::spawn(
            pending,
            async move { raw.delete(keys).await },
            SuccessTrigger::new(hook),
        ))
    }

    /// 开始一个事务
    pub async fn new_transaction(&self) -> DatastoreResult<CachingAsyncTransaction> {
        let raw = self.raw.begin_transaction().await?;
        Ok(CachingAsyncTransaction::new(raw, self.memcache.clone()))
    }
}
