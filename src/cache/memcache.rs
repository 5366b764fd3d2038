//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了实体缓存的批量读写编排和CAS写入协议。

use super::bucket::{Bucket, CacheValue};
use super::control::{CacheControl, ConfigCacheControl};
use super::stats::{EntityMemcacheStats, MemcacheStats, NoopStats};
use crate::backend::retry::DEFAULT_MAX_ATTEMPTS;
use crate::backend::{CacheBackend, CasPut, RetryingCacheClient};
use crate::codec::Codec;
use crate::config::Config;
use crate::key::{Entity, Key};
use crate::metrics::GLOBAL_METRICS;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// 实体缓存
///
/// 读取时为每个键产生一个 [`Bucket`]，写回时消费这些桶：
///
/// - 写入只通过CAS进行，令牌不匹配的写入绝不强制覆盖；
/// - 被拒绝的键如果当前仍有值，就清空它，让缓存收敛到“未知”而不是错误的值；
/// - 已经为空的键不再清空，避免两个清空者互相打架，也不会覆盖更新的写入。
///
/// 所有后端错误都在这一层记录并吸收，调用者只会观察到命中率下降。
pub struct EntityMemcache {
    namespace: String,
    raw: Arc<dyn CacheBackend>,
    retrying: RetryingCacheClient<Arc<dyn CacheBackend>>,
    control: Arc<dyn CacheControl>,
    stats: Arc<dyn MemcacheStats>,
    codec: Codec,
}

impl EntityMemcache {
    /// 创建实体缓存
    ///
    /// # 参数
    ///
    /// * `namespace` - 缓存键前缀
    /// * `backend` - 原始缓存后端
    /// * `control` - 缓存策略
    /// * `stats` - 命中统计接收端
    pub fn new(
        namespace: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
        control: Arc<dyn CacheControl>,
        stats: Arc<dyn MemcacheStats>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            retrying: RetryingCacheClient::with_max_attempts(
                backend.clone(),
                namespace.clone(),
                DEFAULT_MAX_ATTEMPTS,
            ),
            namespace,
            raw: backend,
            control,
            stats,
            codec: Codec::json(),
        }
    }

    /// 使用不记录统计的默认设置创建实体缓存
    pub fn with_defaults(
        namespace: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
        control: Arc<dyn CacheControl>,
    ) -> Self {
        Self::new(namespace, backend, control, Arc::new(NoopStats))
    }

    /// 根据配置创建实体缓存
    pub fn from_config(config: &Config, backend: Arc<dyn CacheBackend>) -> Self {
        let namespace = config.global.namespace.clone();
        Self::new(
            namespace.clone(),
            backend,
            Arc::new(ConfigCacheControl::new(config.cache_control.clone())),
            Arc::new(EntityMemcacheStats::new(namespace)),
        )
        .with_retry_attempts(config.retry.max_attempts)
        .with_codec(Codec::from_config(
            &config.global.serialization,
            config.global.compress,
        ))
    }

    pub fn with_retry_attempts(mut self, max_attempts: u32) -> Self {
        self.retrying =
            RetryingCacheClient::with_max_attempts(self.raw.clone(), self.namespace.clone(), max_attempts);
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stats(&self) -> &Arc<dyn MemcacheStats> {
        &self.stats
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.raw
    }

    pub fn is_cacheable(&self, key: &Key) -> bool {
        self.control.is_cacheable(key)
    }

    /// 实体键对应的缓存键
    pub fn key_for(&self, key: &Key) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// 批量读取缓存桶
    ///
    /// 每个不同的输入键恰好对应一个桶。不可缓存的键不访问后端；
    /// 后端出错时所有键降级为不可缓存。可缓存的键会按命中或未命中计入统计。
    #[instrument(skip(self, keys), level = "debug", fields(namespace = %self.namespace, key_count = keys.len()))]
    pub async fn get_all(&self, keys: &[Key]) -> HashMap<Key, Bucket> {
        self.fetch_buckets(keys, true).await
    }

    async fn fetch_buckets(&self, keys: &[Key], record_stats: bool) -> HashMap<Key, Bucket> {
        let start = Instant::now();
        let mut buckets = HashMap::with_capacity(keys.len());
        let mut cacheable = Vec::new();
        let mut seen = HashSet::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            if self.control.is_cacheable(key) {
                cacheable.push((key.clone(), self.key_for(key)));
            } else {
                buckets.insert(key.clone(), Bucket::uncacheable(key.clone()));
            }
        }

        if cacheable.is_empty() {
            return buckets;
        }

        let cache_keys: Vec<String> = cacheable.iter().map(|(_, ck)| ck.clone()).collect();
        let mut found = match self.raw.get_identifiables(&cache_keys).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    "Cache read failed in namespace {}, bypassing cache for {} keys: {}",
                    self.namespace,
                    cache_keys.len(),
                    e
                );
                GLOBAL_METRICS.record_request(&self.namespace, "memcache", "get", "error");
                HashMap::new()
            }
        };

        for (key, cache_key) in cacheable {
            let bucket = match found.remove(&cache_key) {
                Some(iv) => {
                    let value = iv.value().and_then(|bytes| {
                        match self.codec.decode::<CacheValue>(bytes) {
                            Ok(value) => Some(value),
                            Err(e) => {
                                warn!("Discarding undecodable cache entry {}: {}", cache_key, e);
                                None
                            }
                        }
                    });
                    Bucket::new(key.clone(), Some(iv.with_value(value)))
                }
                None => Bucket::uncacheable(key.clone()),
            };

            if record_stats {
                if bucket.is_empty() {
                    self.stats.record_miss(&key);
                } else {
                    self.stats.record_hit(&key);
                }
            }
            buckets.insert(key, bucket);
        }

        GLOBAL_METRICS.record_duration(
            &self.namespace,
            "memcache",
            "get",
            start.elapsed().as_secs_f64(),
        );
        buckets
    }

    /// 把桶中暂存的值通过CAS写回缓存
    ///
    /// 不可缓存或策略上没有过期时间的桶视为写入成功。被拒绝的键如果当前仍有值就清空。
    #[instrument(skip(self, buckets), level = "debug", fields(namespace = %self.namespace, bucket_count = buckets.len()))]
    pub async fn put_all(&self, buckets: &[Bucket]) {
        let mut payload = HashMap::new();
        let mut keys_by_cache_key = HashMap::new();

        for bucket in buckets {
            let (Some(token), Some(expiry)) = (bucket.token(), self.control.expiry_seconds(bucket.key())) else {
                continue;
            };
            let cache_key = self.key_for(bucket.key());
            let value = match self.codec.encode(&bucket.next_to_store()) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping cache write for {}: {}", cache_key, e);
                    continue;
                }
            };
            payload.insert(
                cache_key.clone(),
                CasPut {
                    token,
                    value: Some(value),
                    expiry: (expiry > 0).then(|| Duration::from_secs(u64::from(expiry))),
                },
            );
            keys_by_cache_key.insert(cache_key, bucket.key().clone());
        }

        if payload.is_empty() {
            return;
        }

        let rejected: Vec<String> = match self.raw.put_if_untouched(&payload).await {
            Ok(successes) => payload
                .keys()
                .filter(|k| !successes.contains(*k))
                .cloned()
                .collect(),
            Err(e) => {
                warn!(
                    "Cache CAS write failed in namespace {} for {} keys: {}",
                    self.namespace,
                    payload.len(),
                    e
                );
                payload.keys().cloned().collect()
            }
        };

        if rejected.is_empty() {
            return;
        }
        debug!("{} CAS writes rejected in namespace {}", rejected.len(), self.namespace);
        GLOBAL_METRICS.record_request(&self.namespace, "memcache", "cas", "rejected");

        let current = match self.raw.get_all(&rejected).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Cache read of rejected keys failed in namespace {}: {}", self.namespace, e);
                HashMap::new()
            }
        };

        let to_reset: Vec<Key> = rejected
            .iter()
            .filter(|ck| current.contains_key(*ck))
            .filter_map(|ck| keys_by_cache_key.get(ck).cloned())
            .collect();
        if !to_reset.is_empty() {
            self.empty(&to_reset).await;
        }
    }

    /// 无条件清空可缓存的键
    ///
    /// 通过重试客户端执行，不走CAS；从不向调用者返回错误。
    #[instrument(skip(self, keys), level = "debug", fields(namespace = %self.namespace, key_count = keys.len()))]
    pub async fn empty(&self, keys: &[Key]) {
        let values: HashMap<String, Option<Vec<u8>>> = keys
            .iter()
            .filter(|key| self.control.is_cacheable(key))
            .map(|key| (self.key_for(key), None))
            .collect();
        if values.is_empty() {
            return;
        }

        if let Err(e) = self.retrying.put_all(&values).await {
            warn!("Cache empty failed in namespace {}: {}", self.namespace, e);
        }
        GLOBAL_METRICS.record_request(&self.namespace, "memcache", "empty", "done");
    }

    /// 为即将写入的实体读取令牌并暂存实体，不计入命中统计
    ///
    /// 令牌必须在写入数据存储之前读取：这样任何与写入交错的缓存填充都会使令牌失效，
    /// 随后的 `put_all` 会被拒绝并清空该键。
    pub async fn prepare_entities(&self, entities: &[Entity]) -> Vec<Bucket> {
        let keys: Vec<Key> = entities.iter().map(|e| e.key().clone()).collect();
        let mut buckets = self.fetch_buckets(&keys, false).await;
        for entity in entities {
            if let Some(bucket) = buckets.get_mut(entity.key()) {
                bucket.set_next(Some(entity.clone()));
            }
        }
        buckets.into_values().collect()
    }

    /// 读取令牌并把实体写入缓存
    pub async fn put_entities(&self, entities: &[Entity]) {
        let buckets = self.prepare_entities(entities).await;
        self.put_all(&buckets).await;
    }
}

impl std::fmt::Debug for EntityMemcache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMemcache")
            .field("namespace", &self.namespace)
            .field("max_attempts", &self.retrying.max_attempts())
            .field("codec", &self.codec)
            .finish()
    }
}
