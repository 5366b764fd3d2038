//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了单个键在一次缓存读写往返中的状态单元。

use crate::backend::{CasToken, IdentifiableValue};
use crate::key::{Entity, Key};
use serde::{Deserialize, Serialize};

/// 实体缓存条目中保存的值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum CacheValue {
    /// 已确认数据存储中不存在该实体
    Negative,
    /// 缓存的实体
    Entity(Entity),
}

/// 负缓存标记，区别于“从未缓存过”
pub const NEGATIVE: CacheValue = CacheValue::Negative;

/// 缓存桶
///
/// 由 `EntityMemcache::get_all` 为每个键创建一个，在随后的 `put_all` 中被消费。
/// `iv` 为空表示该键不可缓存（策略不允许，或读取时后端不可用）；
/// `next` 是只写的暂存区，保存准备写回缓存的实体。
#[derive(Clone, Debug)]
pub struct Bucket {
    key: Key,
    iv: Option<IdentifiableValue<CacheValue>>,
    next: Option<Entity>,
}

impl Bucket {
    pub fn new(key: Key, iv: Option<IdentifiableValue<CacheValue>>) -> Self {
        Self { key, iv, next: None }
    }

    /// 创建不可缓存的桶
    pub fn uncacheable(key: Key) -> Self {
        Self::new(key, None)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_cacheable(&self) -> bool {
        self.iv.is_some()
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self.iv.as_ref().and_then(|iv| iv.value()),
            Some(CacheValue::Negative)
        )
    }

    /// 缓存中没有可用信息（既不是实体也不是负缓存）
    pub fn is_empty(&self) -> bool {
        !self.is_cacheable() || (!self.is_negative() && self.entity().is_none())
    }

    /// 缓存中的实体
    pub fn entity(&self) -> Option<&Entity> {
        match self.iv.as_ref().and_then(|iv| iv.value()) {
            Some(CacheValue::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<CasToken> {
        self.iv.as_ref().map(|iv| iv.token())
    }

    pub fn identifiable_value(&self) -> Option<&IdentifiableValue<CacheValue>> {
        self.iv.as_ref()
    }

    /// 暂存准备写回的实体，`None` 表示写入负缓存
    pub fn set_next(&mut self, next: Option<Entity>) {
        self.next = next;
    }

    pub fn next_to_store(&self) -> CacheValue {
        match &self.next {
            Some(entity) => CacheValue::Entity(entity.clone()),
            None => NEGATIVE,
        }
    }
}
