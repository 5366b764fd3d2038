//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了实体缓存的一致性协议：基于CAS的批量读写、负缓存和缓存策略。

pub mod bucket;
pub mod control;
pub mod memcache;
pub mod stats;

pub use bucket::{Bucket, CacheValue, NEGATIVE};
pub use control::{CacheControl, ConfigCacheControl};
pub use memcache::EntityMemcache;
pub use stats::{EntityMemcacheStats, KindStats, MemcacheStats, NoopStats};
