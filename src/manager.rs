//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存管理器，负责按命名空间初始化和登记实体缓存。

use crate::backend;
use crate::cache::EntityMemcache;
use crate::config::{Config, PutPolicy};
use crate::datastore::{AsyncDatastore, CachingAsyncDatastore};
use crate::error::{CacheError, Result};
use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{info, instrument};

/// 登记的实体缓存及其写入策略
#[derive(Clone, Debug)]
pub struct ManagedCache {
    pub memcache: Arc<EntityMemcache>,
    pub put_policy: PutPolicy,
}

lazy_static! {
    pub static ref MANAGER: Arc<DashMap<String, ManagedCache>> = Arc::new(DashMap::new());
}

/// 缓存管理器
pub struct CacheManager;

impl CacheManager {
    /// 根据配置连接缓存后端并登记实体缓存
    ///
    /// 同一命名空间重复初始化时覆盖旧的登记。
    #[instrument(skip(config), level = "info", fields(namespace = %config.global.namespace))]
    pub async fn init(config: Config) -> Result<Arc<EntityMemcache>> {
        config.validate().map_err(CacheError::ConfigError)?;

        let backend = backend::connect(&config.backend).await?;
        let memcache = Arc::new(EntityMemcache::from_config(&config, backend));
        let namespace = config.global.namespace.clone();

        MANAGER.insert(
            namespace.clone(),
            ManagedCache {
                memcache: memcache.clone(),
                put_policy: config.global.put_policy,
            },
        );
        info!("Entity cache registered for namespace: {}", namespace);
        Ok(memcache)
    }

    /// 清空所有登记
    pub fn reset() {
        MANAGER.clear();
    }
}

/// 获取已登记的实体缓存
pub fn get_memcache(namespace: &str) -> Result<Arc<EntityMemcache>> {
    MANAGER
        .get(namespace)
        .map(|entry| entry.memcache.clone())
        .ok_or_else(|| CacheError::ConfigError(format!("Namespace not found: {}", namespace)))
}

/// 用已登记的实体缓存包装数据存储
pub fn get_datastore(namespace: &str, raw: Arc<dyn AsyncDatastore>) -> Result<CachingAsyncDatastore> {
    let entry = MANAGER
        .get(namespace)
        .ok_or_else(|| CacheError::ConfigError(format!("Namespace not found: {}", namespace)))?;
    Ok(CachingAsyncDatastore::new(raw, entry.memcache.clone()).with_put_policy(entry.put_policy))
}
