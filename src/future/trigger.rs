//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了在异步操作完成时恰好执行一次的回调机制。

use super::pending::{PendingCompletion, PendingFutures, WeakPending};
use super::{cancel_not_supported, TaskFuture};
use crate::error::{DatastoreResult, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error};

/// 完成回调
#[async_trait]
pub trait Trigger<T>: Send + Sync {
    /// 以操作的结果调用，每个 future 恰好一次
    async fn trigger(&self, outcome: &DatastoreResult<T>);
}

/// 成功回调
#[async_trait]
pub trait OnSuccess<T>: Send + Sync {
    async fn success(&self, value: &T) -> Result<()>;
}

/// 只在操作成功时调用 [`OnSuccess::success`] 的完成回调
///
/// 回调自身返回的错误或发生的 panic 会被记录，绝不传播给调用者。
pub struct SuccessTrigger<S> {
    hook: S,
}

impl<S> SuccessTrigger<S> {
    pub fn new(hook: S) -> Self {
        Self { hook }
    }
}

#[async_trait]
impl<T, S> Trigger<T> for SuccessTrigger<S>
where
    T: Send + Sync + 'static,
    S: OnSuccess<T>,
{
    async fn trigger(&self, outcome: &DatastoreResult<T>) {
        let Ok(value) = outcome else {
            return;
        };
        match AssertUnwindSafe(self.hook.success(value)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Success hook failed: {}", e),
            Err(_) => error!("Success hook panicked"),
        }
    }
}

type Firing = Shared<BoxFuture<'static, ()>>;

struct TriggerInner<T> {
    id: u64,
    task: TaskFuture<T>,
    trigger: Arc<dyn Trigger<T>>,
    completed: AtomicBool,
    fired: OnceLock<Firing>,
    registry: Arc<WeakPending>,
}

impl<T: Clone + Send + Sync + 'static> TriggerInner<T> {
    async fn resolve(&self) -> DatastoreResult<T> {
        let outcome = self.task.get().await;
        let firing = self.fired.get_or_init(|| self.fire(&outcome)).clone();
        firing.await;
        outcome
    }

    /// 派发回调任务，返回所有等待者共享的完成句柄
    ///
    /// 同步执行，没有挂起点；回调在独立任务中运行，等待者被取消不会中断它。
    /// 登记项在回调结束后才移除，`flush` 因此会等待正在执行的回调。
    fn fire(&self, outcome: &DatastoreResult<T>) -> Firing {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return futures::future::ready(()).boxed().shared();
        }
        let id = self.id;
        let trigger = self.trigger.clone();
        let observed = outcome.clone();
        let handle = tokio::spawn(async move { trigger.trigger(&observed).await });
        let registry = self.registry.clone();
        async move {
            if let Err(e) = handle.await {
                error!("Completion trigger {} failed: {}", id, e);
            }
            registry.deregister(id);
            debug!("Completion trigger {} fired", id);
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> PendingCompletion for TriggerInner<T> {
    async fn complete(&self) {
        let _ = self.resolve().await;
    }
}

/// 带一次性完成回调的 future
///
/// 创建时登记到 [`PendingFutures`]。第一个观察到操作完成的 `get`/`is_done`
/// 调用原子地设置完成标记并派发回调；所有调用者（包括并发的和之后的）都等待
/// 同一次回调执行完毕，回调结束后移除登记。
/// 没有人等待的 future 由 [`PendingFutures::flush`] 完成。
pub struct TriggerFuture<T> {
    inner: Arc<TriggerInner<T>>,
}

impl<T> Clone for TriggerFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TriggerFuture<T> {
    pub fn new(pending: &PendingFutures, task: TaskFuture<T>, trigger: impl Trigger<T> + 'static) -> Self {
        let id = pending.next_id();
        let inner = Arc::new(TriggerInner {
            id,
            task,
            trigger: Arc::new(trigger),
            completed: AtomicBool::new(false),
            fired: OnceLock::new(),
            registry: Arc::new(pending.downgrade()),
        });
        pending.register(id, inner.clone());
        Self { inner }
    }

    /// 派发操作并附加完成回调
    pub fn spawn<F>(pending: &PendingFutures, operation: F, trigger: impl Trigger<T> + 'static) -> Self
    where
        F: Future<Output = DatastoreResult<T>> + Send + 'static,
    {
        Self::new(pending, TaskFuture::spawn(operation), trigger)
    }

    pub async fn get(&self) -> DatastoreResult<T> {
        self.inner.resolve().await
    }

    /// 超时只作用于底层操作；操作一旦完成，回调总会执行
    pub async fn get_timeout(&self, limit: Duration) -> DatastoreResult<T> {
        self.inner.task.get_timeout(limit).await?;
        self.get().await
    }

    pub async fn is_done(&self) -> bool {
        if !self.inner.task.is_finished() {
            return false;
        }
        let _ = self.inner.resolve().await;
        true
    }

    /// 回调是否已经执行（或正在执行）
    pub fn has_fired(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// 不支持取消：回调产生的副作用无法安全撤销
    pub fn cancel(&self) -> Result<bool> {
        Err(cancel_not_supported())
    }
}
