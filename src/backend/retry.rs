//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存后端的有界重试装饰器。

use super::{CacheBackend, CasPut, IdentifiableValue};
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{debug, error, instrument};

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// 有界重试的缓存客户端
///
/// 每次后端调用最多尝试 `max_attempts` 次，失败后立即重试。
/// 全部失败时记录错误日志并返回降级结果（空集合或空操作），从不向调用者返回错误：
/// 缓存故障只会影响命中率和延迟，不会让真正的数据存储操作失败。
pub struct RetryingCacheClient<B> {
    inner: B,
    namespace: String,
    max_attempts: u32,
}

impl<B: CacheBackend> RetryingCacheClient<B> {
    pub fn new(inner: B, namespace: impl Into<String>) -> Self {
        Self::with_max_attempts(inner, namespace, DEFAULT_MAX_ATTEMPTS)
    }

    /// 创建指定最大尝试次数的客户端，次数至少为 1
    pub fn with_max_attempts(inner: B, namespace: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// 带重试地执行一次后端调用
    ///
    /// # 参数
    ///
    /// * `op` - 操作名称，用于日志和指标
    /// * `degraded` - 全部尝试失败时返回的值
    /// * `call` - 每次尝试调用一次的后端操作
    async fn with_retry<T, F, Fut>(&self, op: &'static str, degraded: impl FnOnce() -> T, mut call: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                debug!(
                    "Retry attempt {} of {} for {} in namespace {}",
                    attempt, self.max_attempts, op, self.namespace
                );
            }
            match call().await {
                Ok(value) => return value,
                Err(e) => {
                    debug!("Cache backend {} failed on attempt {}: {}", op, attempt, e);
                    last_error = Some(e);
                }
            }
        }

        GLOBAL_METRICS.record_request(&self.namespace, "backend", op, "exhausted");
        error!(
            "Cache backend {} failed after {} attempts in namespace {}: {}",
            op,
            self.max_attempts,
            self.namespace,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
        degraded()
    }
}

#[async_trait]
impl<B: CacheBackend> CacheBackend for RetryingCacheClient<B> {
    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_identifiables(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, IdentifiableValue<Vec<u8>>>> {
        Ok(self
            .with_retry("get_identifiables", HashMap::new, || self.inner.get_identifiables(keys))
            .await)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self
            .with_retry("get_all", HashMap::new, || self.inner.get_all(keys))
            .await)
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_all(&self, values: &HashMap<String, Option<Vec<u8>>>) -> Result<()> {
        self.with_retry("put_all", || (), || self.inner.put_all(values))
            .await;
        Ok(())
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_if_untouched(&self, values: &HashMap<String, CasPut>) -> Result<HashSet<String>> {
        Ok(self
            .with_retry("put_if_untouched", HashSet::new, || self.inner.put_if_untouched(values))
            .await)
    }

    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        self.with_retry("delete_all", || (), || self.inner.delete_all(keys))
            .await;
        Ok(())
    }

    /// 健康检查不重试，直接反映后端的真实状态
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
