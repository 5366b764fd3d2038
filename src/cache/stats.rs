//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存命中统计。

use crate::key::Key;
use crate::metrics::GLOBAL_METRICS;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 单个实体类型的命中统计快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindStats {
    pub hits: u64,
    pub misses: u64,
}

impl KindStats {
    /// 命中率百分比，没有请求时为 0
    pub fn percent(&self) -> u64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0
        } else {
            self.hits * 100 / total
        }
    }
}

/// 命中统计接收端
pub trait MemcacheStats: Send + Sync {
    fn record_hit(&self, key: &Key);
    fn record_miss(&self, key: &Key);

    /// 按实体类型汇总的统计，不支持汇总的实现返回空
    fn snapshot(&self) -> BTreeMap<String, KindStats> {
        BTreeMap::new()
    }
}

/// 不做任何记录的统计实现
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStats;

impl MemcacheStats for NoopStats {
    fn record_hit(&self, _key: &Key) {}
    fn record_miss(&self, _key: &Key) {}
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// 按实体类型计数的统计实现，同时上报全局指标
#[derive(Debug)]
pub struct EntityMemcacheStats {
    namespace: String,
    kinds: DashMap<String, Counters>,
}

impl EntityMemcacheStats {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kinds: DashMap::new(),
        }
    }

    pub fn kind(&self, kind: &str) -> KindStats {
        self.kinds
            .get(kind)
            .map(|c| KindStats {
                hits: c.hits.load(Ordering::Relaxed),
                misses: c.misses.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }
}

impl MemcacheStats for EntityMemcacheStats {
    fn record_hit(&self, key: &Key) {
        self.kinds
            .entry(key.kind().to_string())
            .or_default()
            .hits
            .fetch_add(1, Ordering::Relaxed);
        GLOBAL_METRICS.record_request(&self.namespace, "memcache", "get", "hit");
    }

    fn record_miss(&self, key: &Key) {
        self.kinds
            .entry(key.kind().to_string())
            .or_default()
            .misses
            .fetch_add(1, Ordering::Relaxed);
        GLOBAL_METRICS.record_request(&self.namespace, "memcache", "get", "miss");
    }

    fn snapshot(&self) -> BTreeMap<String, KindStats> {
        self.kinds
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    KindStats {
                        hits: entry.hits.load(Ordering::Relaxed),
                        misses: entry.misses.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}
