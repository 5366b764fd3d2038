//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了数据存储接口以及在其之上的缓存装饰器。

pub mod caching;
pub mod memory;
pub mod transaction;

use crate::error::DatastoreResult;
use crate::key::{Entity, Key};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use caching::CachingAsyncDatastore;
pub use memory::MemoryDatastore;
pub use transaction::{CachingAsyncTransaction, Enlisted, TransactionState};

/// 原始异步数据存储
///
/// 这是数据的唯一可信来源，缓存层只是它前面的尽力而为的优化。
#[async_trait]
pub trait AsyncDatastore: Send + Sync {
    /// 批量读取，不存在的键不出现在结果中
    async fn get(&self, keys: Vec<Key>) -> DatastoreResult<HashMap<Key, Entity>>;

    /// 批量写入，按输入顺序返回实体的键
    async fn put(&self, entities: Vec<Entity>) -> DatastoreResult<Vec<Key>>;

    async fn delete(&self, keys: Vec<Key>) -> DatastoreResult<()>;

    async fn begin_transaction(&self) -> DatastoreResult<Arc<dyn AsyncTransaction>>;
}

/// 原始数据存储事务
#[async_trait]
pub trait AsyncTransaction: Send + Sync {
    async fn get(&self, keys: Vec<Key>) -> DatastoreResult<HashMap<Key, Entity>>;

    async fn put(&self, entities: Vec<Entity>) -> DatastoreResult<Vec<Key>>;

    async fn delete(&self, keys: Vec<Key>) -> DatastoreResult<()>;

    /// 提交事务。失败时（例如乐观并发冲突）事务不再可用。
    async fn commit(&self) -> DatastoreResult<()>;

    async fn rollback(&self) -> DatastoreResult<()>;

    fn is_active(&self) -> bool;
}
