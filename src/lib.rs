//! oxentity - 带CAS一致性写穿透缓存的实体持久层
//!
//! 在异步数据存储之前放置一层分布式实体缓存（内存或Redis），
//! 在并发访问、事务和异步I/O下保证缓存永远不会悄悄地持有过期数据：
//! 缓存写入只通过CAS进行，冲突时清空而不是覆盖；事务内的修改在提交成功后才使缓存失效；
//! 缓存副作用通过一次性完成回调绑定到异步操作上。

#![doc(html_root_url = "https://docs.rs/oxentity/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod datastore;
pub mod error;
pub mod future;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use backend::{CacheBackend, CasToken, IdentifiableValue, MemoryCacheBackend, RetryingCacheClient};
pub use cache::{Bucket, CacheControl, CacheValue, ConfigCacheControl, EntityMemcache, MemcacheStats};
pub use config::Config;
pub use datastore::{AsyncDatastore, AsyncTransaction, CachingAsyncDatastore, CachingAsyncTransaction};
pub use error::{CacheError, DatastoreError};
pub use future::{DatastoreFuture, PendingFutures};
pub use key::{Entity, Key};
pub use manager::{get_datastore, get_memcache, CacheManager};

/// oxentity 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
