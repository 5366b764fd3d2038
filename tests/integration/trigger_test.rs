//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 一次性完成回调集成测试

use crate::common::setup_logging;
use async_trait::async_trait;
use futures::future::join_all;
use oxentity::error::{CacheError, DatastoreResult, Result};
use oxentity::future::{OnSuccess, PendingFutures, SuccessTrigger, TriggerFuture};
use oxentity::DatastoreError;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

#[derive(Clone, Default)]
struct Counter(Arc<AtomicU32>);

impl Counter {
    fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// 记录调用次数的成功回调
struct CountingHook {
    calls: Counter,
    delay: Duration,
}

#[async_trait]
impl OnSuccess<u32> for CountingHook {
    async fn success(&self, _value: &u32) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting(calls: &Counter, delay_ms: u64) -> SuccessTrigger<CountingHook> {
    SuccessTrigger::new(CountingHook {
        calls: calls.clone(),
        delay: Duration::from_millis(delay_ms),
    })
}

fn after(ms: u64, result: DatastoreResult<u32>) -> impl Future<Output = DatastoreResult<u32>> + Send + 'static {
    async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        result
    }
}

/// 测试并发等待同一个 future 时回调恰好执行一次
#[tokio::test]
async fn test_trigger_fires_exactly_once_under_concurrent_gets() {
    setup_logging();
    let pending = PendingFutures::named("exactly_once");
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(20, Ok(7)), counting(&calls, 10));
    assert_eq!(pending.len(), 1);

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let f = future.clone();
            async move { f.get().await }
        })
        .collect();
    let results = join_all(waiters).await;

    assert!(results.iter().all(|r| r == &Ok(7)));
    assert!(future.is_done().await);
    pending.flush().await;
    assert_eq!(calls.get(), 1);
    assert!(future.has_fired());
    assert!(pending.is_empty());
}

/// 测试操作失败时不调用成功回调，错误原样返回
#[tokio::test]
async fn test_success_hook_skipped_on_error() {
    let pending = PendingFutures::new();
    let calls = Counter::default();
    let error = DatastoreError::Unavailable("down".to_string());
    let future = TriggerFuture::spawn(&pending, after(0, Err(error.clone())), counting(&calls, 0));

    assert_eq!(future.get().await, Err(error));
    assert_eq!(calls.get(), 0);
    assert!(future.has_fired());
    assert!(pending.is_empty());
}

struct FailingHook;

#[async_trait]
impl OnSuccess<u32> for FailingHook {
    async fn success(&self, _value: &u32) -> Result<()> {
        Err(CacheError::BackendError("cache unreachable".to_string()))
    }
}

struct PanickingHook;

#[async_trait]
impl OnSuccess<u32> for PanickingHook {
    async fn success(&self, value: &u32) -> Result<()> {
        if *value > 0 {
            panic!("hook exploded");
        }
        Ok(())
    }
}

/// 测试回调的错误和 panic 不会传播给调用者
#[tokio::test]
async fn test_hook_failures_are_contained() {
    let pending = PendingFutures::new();

    let failing = TriggerFuture::spawn(&pending, after(0, Ok(1)), SuccessTrigger::new(FailingHook));
    assert_eq!(failing.get().await, Ok(1));

    let panicking = TriggerFuture::spawn(&pending, after(0, Ok(2)), SuccessTrigger::new(PanickingHook));
    assert_eq!(panicking.get().await, Ok(2));
    assert_eq!(panicking.get().await, Ok(2));
    assert!(pending.is_empty());
}

/// 测试带回调的 future 不可取消，回调仍由 flush 执行
#[tokio::test]
async fn test_cancel_is_not_supported() {
    let pending = PendingFutures::new();
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(10, Ok(3)), counting(&calls, 0));

    assert!(matches!(future.cancel(), Err(CacheError::NotSupported(_))));

    pending.flush().await;
    assert_eq!(calls.get(), 1);
    assert_eq!(future.get().await, Ok(3));
    assert_eq!(calls.get(), 1);
}

/// 测试超时只作用于底层操作，之后的等待仍会执行回调
#[tokio::test]
async fn test_timeout_does_not_fire_trigger() {
    let pending = PendingFutures::new();
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(200, Ok(4)), counting(&calls, 0));

    let err = future.get_timeout(Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, DatastoreError::Timeout(_)));
    assert!(!future.has_fired());
    assert_eq!(pending.len(), 1);

    assert_eq!(future.get().await, Ok(4));
    assert_eq!(calls.get(), 1);
}

/// 测试等待者被取消时回调仍执行完毕且只执行一次
#[tokio::test]
async fn test_cancelled_waiter_does_not_interrupt_trigger() {
    let pending = PendingFutures::new();
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(0, Ok(5)), counting(&calls, 50));

    let waiter = {
        let f = future.clone();
        tokio::spawn(async move { f.get().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.get(), 1);
    assert_eq!(future.get().await, Ok(5));
    assert_eq!(calls.get(), 1);
}

/// 测试第一个等待者被取消后，之后的 get 和 flush 仍等到回调执行完毕才返回
#[tokio::test]
async fn test_later_waiters_block_until_interrupted_trigger_finishes() {
    let pending = PendingFutures::named("aborted_waiter");
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(0, Ok(6)), counting(&calls, 100));

    let waiter = {
        let f = future.clone();
        tokio::spawn(async move { f.get().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();
    assert!(future.has_fired());
    assert_eq!(calls.get(), 0);

    assert_eq!(future.get().await, Ok(6));
    assert_eq!(calls.get(), 1);
    pending.flush().await;
    assert_eq!(calls.get(), 1);
    assert!(pending.is_empty());
}

/// 测试回调执行期间 flush 会等待它结束
#[tokio::test]
async fn test_flush_waits_for_running_trigger() {
    let pending = PendingFutures::named("running_trigger");
    let calls = Counter::default();
    let future = TriggerFuture::spawn(&pending, after(0, Ok(8)), counting(&calls, 80));

    let waiter = {
        let f = future.clone();
        tokio::spawn(async move { f.get().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();
    assert_eq!(pending.len(), 1);

    pending.flush().await;
    assert_eq!(calls.get(), 1);
    assert!(pending.is_empty());
}

/// 在回调中登记新 future 的回调
struct ChainingHook {
    pending: PendingFutures,
    chained: Counter,
}

#[async_trait]
impl OnSuccess<u32> for ChainingHook {
    async fn success(&self, value: &u32) -> Result<()> {
        let _ = TriggerFuture::spawn(&self.pending, after(5, Ok(*value + 1)), counting(&self.chained, 0));
        Ok(())
    }
}

/// 测试 flush 会完成回调执行期间新登记的 future
#[tokio::test]
async fn test_flush_completes_recursively_registered_futures() {
    let pending = PendingFutures::named("chained");
    let chained = Counter::default();
    let _first = TriggerFuture::spawn(
        &pending,
        after(5, Ok(1)),
        SuccessTrigger::new(ChainingHook {
            pending: pending.clone(),
            chained: chained.clone(),
        }),
    );

    pending.flush().await;

    assert_eq!(chained.get(), 1);
    assert!(pending.is_empty());
}
