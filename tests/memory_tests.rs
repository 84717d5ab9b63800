//! Integration tests for the in-process backend.

use std::sync::Arc;
use std::time::Duration;

use sync_coordinator::{Context, Coordinator, Key, Locker, LockerState, MemoryCoordinator};
use tokio::sync::Barrier;

mod common;
use common::run_counter_workers;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_10() {
    let coordinator = MemoryCoordinator::default();
    assert_eq!(run_counter_workers(&coordinator, "counter", 10).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_100() {
    let coordinator = MemoryCoordinator::default();
    assert_eq!(run_counter_workers(&coordinator, "counter", 100).await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_1000() {
    let coordinator = MemoryCoordinator::default();
    assert_eq!(run_counter_workers(&coordinator, "counter", 1000).await, 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_10000() {
    let coordinator = MemoryCoordinator::default();
    assert_eq!(run_counter_workers(&coordinator, "counter", 10_000).await, 10_000);
    assert_eq!(coordinator.key_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_interleave() {
    let coordinator = MemoryCoordinator::default();
    // Both sections must be inside their lock at the same time to pass the
    // barrier; a shared lock would deadlock here.
    let barrier = Arc::new(Barrier::new(2));

    let tasks: Vec<_> = ["doc-a", "doc-b"]
        .into_iter()
        .map(|key| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let ctx = Context::background();
                let locker = coordinator.new_locker(&ctx, Key::from(key)).unwrap();
                locker.lock(&ctx).await.unwrap();
                barrier.wait().await;
                locker.unlock(&ctx).await.unwrap();
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            task.await.unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(coordinator.key_count(), 2);
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_no_trace() {
    let coordinator = MemoryCoordinator::default();
    let ctx = Context::background();
    let holder = coordinator.new_locker(&ctx, Key::from("doc")).unwrap();
    holder.lock(&ctx).await.unwrap();

    let wait_ctx = Context::background();
    let waiter = coordinator.new_locker(&wait_ctx, Key::from("doc")).unwrap();
    let cancel = wait_ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let err = waiter.lock(&wait_ctx).await.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(waiter.state(), LockerState::Unlocked);

    holder.unlock(&ctx).await.unwrap();

    let next = coordinator.new_locker(&ctx, Key::from("doc")).unwrap();
    assert!(next.try_lock(&ctx).await.unwrap());
    next.unlock(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_dropped_lock_future_rolls_back() {
    let coordinator = MemoryCoordinator::default();
    let ctx = Context::background();
    let holder = coordinator.new_locker(&ctx, Key::from("doc")).unwrap();
    holder.lock(&ctx).await.unwrap();

    let waiter = coordinator.new_locker(&ctx, Key::from("doc")).unwrap();
    let result = tokio::time::timeout(Duration::from_millis(20), waiter.lock(&ctx)).await;
    assert!(result.is_err());
    assert_eq!(waiter.state(), LockerState::Unlocked);

    holder.unlock(&ctx).await.unwrap();
    waiter.lock(&ctx).await.unwrap();
    waiter.unlock(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_unlock_ignores_done_context() {
    let coordinator = MemoryCoordinator::default();
    let ctx = Context::background();
    let locker = coordinator.new_locker(&ctx, Key::from("doc")).unwrap();
    locker.lock(&ctx).await.unwrap();

    ctx.cancel();
    locker.unlock(&ctx).await.unwrap();
    assert_eq!(locker.state(), LockerState::Unlocked);
}
