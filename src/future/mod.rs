//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了数据存储异步操作的 future 模型。
//!
//! 操作在创建时即被派发到 tokio 运行时执行，无论调用者是否等待其结果；
//! 结果会被记住，可以从任意任务多次读取。

pub mod pending;
pub mod trigger;

use crate::error::{CacheError, DatastoreError, DatastoreResult, Result};
use futures::future::BoxFuture;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::{AbortHandle, JoinError, JoinHandle};

pub use pending::{PendingCompletion, PendingFutures};
pub use trigger::{OnSuccess, SuccessTrigger, Trigger, TriggerFuture};

fn join_error(e: JoinError) -> DatastoreError {
    if e.is_panic() {
        DatastoreError::Internal("datastore operation panicked".to_string())
    } else {
        DatastoreError::Cancelled("datastore operation was cancelled".to_string())
    }
}

struct TaskInner<T> {
    handle: Mutex<JoinHandle<DatastoreResult<T>>>,
    abort: AbortHandle,
    outcome: OnceCell<DatastoreResult<T>>,
}

/// 已派发的数据存储操作
///
/// 可克隆，所有克隆共享同一个结果。
pub struct TaskFuture<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field(
                "finished",
                &(self.inner.outcome.initialized() || self.inner.abort.is_finished()),
            )
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> TaskFuture<T> {
    /// 在当前 tokio 运行时上派发操作
    pub fn spawn<F>(operation: F) -> Self
    where
        F: Future<Output = DatastoreResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(operation);
        Self {
            inner: Arc::new(TaskInner {
                abort: handle.abort_handle(),
                handle: Mutex::new(handle),
                outcome: OnceCell::new(),
            }),
        }
    }

    /// 等待并返回操作结果
    ///
    /// 可被重复调用；调用者被取消不会影响操作本身。
    pub async fn get(&self) -> DatastoreResult<T> {
        self.inner
            .outcome
            .get_or_init(|| async {
                let mut handle = self.inner.handle.lock().await;
                (&mut *handle).await.unwrap_or_else(|e| Err(join_error(e)))
            })
            .await
            .clone()
    }

    /// 在限定时间内等待结果，超时不会取消操作
    pub async fn get_timeout(&self, limit: Duration) -> DatastoreResult<T> {
        tokio::time::timeout(limit, self.get())
            .await
            .map_err(|_| DatastoreError::Timeout(format!("no result after {}ms", limit.as_millis())))?
    }

    pub fn is_finished(&self) -> bool {
        self.inner.outcome.initialized() || self.inner.abort.is_finished()
    }

    /// 中止操作，已完成时返回 `false`
    pub fn abort(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.inner.abort.abort();
        true
    }
}

/// 数据存储操作的结果句柄
///
/// - `Ready`：结果已知，无需任何异步工作；
/// - `Task`：普通的已派发操作；
/// - `Triggered`：带有一次性完成回调的操作，不可取消。
pub enum DatastoreFuture<T> {
    Ready(DatastoreResult<T>),
    Task(TaskFuture<T>),
    Triggered(TriggerFuture<T>),
}

impl<T: Clone> Clone for DatastoreFuture<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Ready(result) => Self::Ready(result.clone()),
            Self::Task(task) => Self::Task(task.clone()),
            Self::Triggered(triggered) => Self::Triggered(triggered.clone()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> DatastoreFuture<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn failed(error: DatastoreError) -> Self {
        Self::Ready(Err(error))
    }

    pub fn spawn<F>(operation: F) -> Self
    where
        F: Future<Output = DatastoreResult<T>> + Send + 'static,
    {
        Self::Task(TaskFuture::spawn(operation))
    }

    pub async fn get(&self) -> DatastoreResult<T> {
        match self {
            Self::Ready(result) => result.clone(),
            Self::Task(task) => task.get().await,
            Self::Triggered(triggered) => triggered.get().await,
        }
    }

    pub async fn get_timeout(&self, limit: Duration) -> DatastoreResult<T> {
        match self {
            Self::Ready(result) => result.clone(),
            Self::Task(task) => task.get_timeout(limit).await,
            Self::Triggered(triggered) => triggered.get_timeout(limit).await,
        }
    }

    /// 操作是否已完成；对带回调的操作，完成时会确保回调已执行
    pub async fn is_done(&self) -> bool {
        match self {
            Self::Ready(_) => true,
            Self::Task(task) => task.is_finished(),
            Self::Triggered(triggered) => triggered.is_done().await,
        }
    }

    /// 取消操作
    ///
    /// 带完成回调的操作不支持取消，返回 `NotSupported`。
    pub fn cancel(&self) -> Result<bool> {
        match self {
            Self::Ready(_) => Ok(false),
            Self::Task(task) => Ok(task.abort()),
            Self::Triggered(triggered) => triggered.cancel(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for DatastoreFuture<T> {
    type Output = DatastoreResult<T>;
    type IntoFuture = BoxFuture<'static, DatastoreResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.get().await })
    }
}

/// 取消失败时使用的错误
pub(crate) fn cancel_not_supported() -> CacheError {
    CacheError::NotSupported("a future with a pending completion trigger cannot be cancelled".to_string())
}
