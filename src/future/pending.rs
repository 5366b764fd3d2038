//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了尚未触发完成回调的 future 登记表。

use crate::metrics::GLOBAL_METRICS;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// 等待完成的登记项
#[async_trait]
pub trait PendingCompletion: Send + Sync {
    /// 等待底层操作完成并执行回调，完成后必须已从登记表移除
    async fn complete(&self);
}

struct Registry {
    scope: String,
    entries: DashMap<u64, Arc<dyn PendingCompletion>>,
    next_id: AtomicU64,
}

/// 一个工作单元（请求、任务、测试）范围内的待完成 future 集合
///
/// 带完成回调的 future 在创建时登记，在回调执行时移除。调用者没有等待的
/// future 需要在工作单元结束时调用 [`PendingFutures::flush`] 来保证回调执行。
/// 句柄可廉价克隆，所有克隆共享同一个登记表。
#[derive(Clone)]
pub struct PendingFutures {
    inner: Arc<Registry>,
}

impl Default for PendingFutures {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingFutures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFutures")
            .field("scope", &self.inner.scope)
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingFutures {
    pub fn new() -> Self {
        Self::named("default")
    }

    /// 创建带名称的范围，名称用于日志和指标
    pub fn named(scope: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Registry {
                scope: scope.into(),
                entries: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: u64, entry: Arc<dyn PendingCompletion>) {
        self.inner.entries.insert(id, entry);
    }

    pub(crate) fn downgrade(&self) -> WeakPending {
        WeakPending(Arc::downgrade(&self.inner))
    }

    /// 完成所有登记的 future
    ///
    /// 回调中可能登记新的 future，因此反复取快照直到登记表为空。幂等。
    pub async fn flush(&self) {
        let mut rounds = 0usize;
        loop {
            let snapshot: Vec<Arc<dyn PendingCompletion>> = self
                .inner
                .entries
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            if snapshot.is_empty() {
                break;
            }
            rounds += 1;
            debug!(
                "Flushing {} pending futures in scope {} (round {})",
                snapshot.len(),
                self.inner.scope,
                rounds
            );
            for entry in snapshot {
                entry.complete().await;
            }
        }
        GLOBAL_METRICS.set_pending_futures(&self.inner.scope, self.len());
    }
}

/// 登记表的弱引用，供登记项在回调时移除自己
pub(crate) struct WeakPending(Weak<Registry>);

impl WeakPending {
    pub(crate) fn deregister(&self, id: u64) {
        if let Some(registry) = self.0.upgrade() {
            registry.entries.remove(&id);
        }
    }
}
