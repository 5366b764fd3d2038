//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存策略接口及基于配置的实现。

use crate::config::CacheControlConfig;
use crate::key::Key;

/// 缓存策略
///
/// 纯函数：给定键，决定是否可缓存以及过期时间。
pub trait CacheControl: Send + Sync {
    fn is_cacheable(&self, key: &Key) -> bool;

    /// 过期秒数。`None` 表示即使可缓存也不写入，`Some(0)` 表示永不过期。
    fn expiry_seconds(&self, key: &Key) -> Option<u32>;
}

/// 基于 `[cache_control]` 配置段的缓存策略
///
/// 按实体类型（`Key::kind`）查找策略；未单独配置的类型只有在设置了
/// `default_expiry_secs` 时才可缓存。
#[derive(Clone, Debug, Default)]
pub struct ConfigCacheControl {
    config: CacheControlConfig,
}

impl ConfigCacheControl {
    pub fn new(config: CacheControlConfig) -> Self {
        Self { config }
    }

    /// 所有类型都可缓存，使用统一的过期时间
    pub fn cache_everything(expiry_secs: u32) -> Self {
        Self::new(CacheControlConfig {
            default_expiry_secs: Some(expiry_secs),
            ..Default::default()
        })
    }
}

impl CacheControl for ConfigCacheControl {
    fn is_cacheable(&self, key: &Key) -> bool {
        match self.config.kinds.get(key.kind()) {
            Some(kind) => kind.cacheable,
            None => self.config.default_expiry_secs.is_some(),
        }
    }

    fn expiry_seconds(&self, key: &Key) -> Option<u32> {
        match self.config.kinds.get(key.kind()) {
            Some(kind) if !kind.cacheable => None,
            Some(kind) => kind.expiry_secs.or(self.config.default_expiry_secs),
            None => self.config.default_expiry_secs,
        }
    }
}
