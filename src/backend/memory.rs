//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内存缓存后端，适用于单节点部署和测试。

use super::{CacheBackend, CasPut, CasToken, IdentifiableValue};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// 单个键的存储状态
///
/// 值过期后版本号仍然保留，避免过期后版本号回绕导致的ABA问题。
#[derive(Debug)]
struct MemEntry {
    value: Option<Vec<u8>>,
    version: u64,
    expires_at: Option<Instant>,
}

impl MemEntry {
    fn live_value(&self) -> Option<&Vec<u8>> {
        match self.expires_at {
            Some(at) if Instant::now() >= at => None,
            _ => self.value.as_ref(),
        }
    }

    fn store(&mut self, value: Option<Vec<u8>>, expiry: Option<Duration>) {
        self.value = value;
        self.version += 1;
        self.expires_at = expiry.map(|ttl| Instant::now() + ttl);
    }
}

/// 进程内存缓存后端
///
/// 基于 `DashMap`，每个键的条件写入在分片锁内完成，因此是原子的。
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, MemEntry>,
    operations: AtomicU64,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 后端被调用的总次数
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// 当前有值的键数量
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.live_value().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_identifiables(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, IdentifiableValue<Vec<u8>>>> {
        self.touch();
        let result = keys
            .iter()
            .map(|key| {
                let iv = match self.entries.get(key) {
                    Some(entry) => {
                        IdentifiableValue::new(entry.live_value().cloned(), CasToken(entry.version))
                    }
                    None => IdentifiableValue::new(None, CasToken(0)),
                };
                (key.clone(), iv)
            })
            .collect();
        Ok(result)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        self.touch();
        Ok(keys
            .iter()
            .filter_map(|key| {
                let entry = self.entries.get(key)?;
                entry.live_value().map(|v| (key.clone(), v.clone()))
            })
            .collect())
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_all(&self, values: &HashMap<String, Option<Vec<u8>>>) -> Result<()> {
        self.touch();
        for (key, value) in values {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| MemEntry {
                    value: None,
                    version: 0,
                    expires_at: None,
                })
                .store(value.clone(), None);
        }
        Ok(())
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_if_untouched(&self, values: &HashMap<String, CasPut>) -> Result<HashSet<String>> {
        self.touch();
        let mut successes = HashSet::new();
        for (key, put) in values {
            let stored = match self.entries.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().version == put.token.0 {
                        occupied.get_mut().store(put.value.clone(), put.expiry);
                        true
                    } else {
                        false
                    }
                }
                Entry::Vacant(vacant) => {
                    if put.token.0 == 0 {
                        let mut entry = MemEntry {
                            value: None,
                            version: 0,
                            expires_at: None,
                        };
                        entry.store(put.value.clone(), put.expiry);
                        vacant.insert(entry);
                        true
                    } else {
                        false
                    }
                }
            };
            if stored {
                successes.insert(key.clone());
            } else {
                debug!("CAS rejected: key={}, token={:?}", key, put.token);
            }
        }
        Ok(successes)
    }

    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        self.touch();
        for key in keys {
            if let Some(mut entry) = self.entries.get_mut(key) {
                entry.store(None, None);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
