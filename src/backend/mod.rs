//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了分布式缓存后端的接口，以及内存、Redis和重试装饰器三种实现。
//!
//! 后端只处理字节：值为 `None` 表示该键处于“已清空”状态（仍持有版本号），
//! 与从未写入过的键在CAS语义上等价。

pub mod memory;
pub mod redis_backend;
pub mod redis_provider;
pub mod retry;

use crate::config::BackendConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub use self::memory::MemoryCacheBackend;
pub use self::redis_backend::RedisBackend;
pub use self::retry::RetryingCacheClient;

/// CAS令牌
///
/// 读取时观察到的版本号。任何一次成功写入都会使之前取得的令牌失效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CasToken(pub u64);

/// 绑定了CAS令牌的值
#[derive(Clone, Debug, PartialEq)]
pub struct IdentifiableValue<V> {
    value: Option<V>,
    token: CasToken,
}

impl<V> IdentifiableValue<V> {
    pub fn new(value: Option<V>, token: CasToken) -> Self {
        Self { value, token }
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn token(&self) -> CasToken {
        self.token
    }

    /// 返回绑定同一令牌的新值
    pub fn with_value<U>(&self, value: Option<U>) -> IdentifiableValue<U> {
        IdentifiableValue {
            value,
            token: self.token,
        }
    }
}

/// 一次条件写入的载荷
#[derive(Clone, Debug)]
pub struct CasPut {
    /// 读取时观察到的令牌
    pub token: CasToken,
    /// 要写入的值，`None` 表示写入“已清空”状态
    pub value: Option<Vec<u8>>,
    /// 过期时间，`None` 表示永不过期
    pub expiry: Option<Duration>,
}

/// 分布式缓存后端特征
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 批量读取值及其CAS令牌
    ///
    /// 对每个请求的键都返回一项，从未写入过的键返回空值和初始令牌。
    async fn get_identifiables(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, IdentifiableValue<Vec<u8>>>>;

    /// 批量读取值，只返回当前有值的键
    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// 无条件批量写入，`None` 表示清空
    async fn put_all(&self, values: &HashMap<String, Option<Vec<u8>>>) -> Result<()>;

    /// 批量条件写入，返回写入成功的键
    async fn put_if_untouched(&self, values: &HashMap<String, CasPut>) -> Result<HashSet<String>>;

    /// 批量删除值
    ///
    /// 版本号递增并保留，之前读取的令牌全部失效。
    async fn delete_all(&self, keys: &[String]) -> Result<()>;

    /// 检查连接是否正常
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn get_identifiables(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, IdentifiableValue<Vec<u8>>>> {
        (**self).get_identifiables(keys).await
    }

    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        (**self).get_all(keys).await
    }

    async fn put_all(&self, values: &HashMap<String, Option<Vec<u8>>>) -> Result<()> {
        (**self).put_all(values).await
    }

    async fn put_if_untouched(&self, values: &HashMap<String, CasPut>) -> Result<HashSet<String>> {
        (**self).put_if_untouched(values).await
    }

    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        (**self).delete_all(keys).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

/// 根据配置创建缓存后端
pub async fn connect(config: &BackendConfig) -> Result<Arc<dyn CacheBackend>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryCacheBackend::new())),
        BackendConfig::Redis(redis_config) => Ok(Arc::new(RedisBackend::new(redis_config).await?)),
    }
}
