//! Contract tests run against every backend.

use std::time::Duration;

use sync_coordinator::{
    Context, Coordinator, CoordinatorExt, Key, LockError, Locker, LockerState, MemoryCoordinator,
    MemoryLeaseStore,
};

mod common;

/// Lock, unlock, and relock a fresh locker for the same key.
async fn check_lock_cycle<C: Coordinator>(coordinator: &C) {
    let ctx = Context::background();
    let locker = coordinator.new_locker(&ctx, Key::from("cycle")).unwrap();
    assert_eq!(locker.key().as_str(), "cycle");
    assert_eq!(locker.state(), LockerState::Unlocked);

    locker.lock(&ctx).await.unwrap();
    assert_eq!(locker.state(), LockerState::Locked);
    locker.unlock(&ctx).await.unwrap();
    assert_eq!(locker.state(), LockerState::Unlocked);

    let again = coordinator.new_locker(&ctx, Key::from("cycle")).unwrap();
    assert!(again.try_lock(&ctx).await.unwrap());
    again.unlock(&ctx).await.unwrap();
}

/// Out-of-order calls are rejected and leave the state unchanged.
async fn check_state_guards<C: Coordinator>(coordinator: &C) {
    let ctx = Context::background();
    let locker = coordinator.new_locker(&ctx, Key::from("guards")).unwrap();

    let err = locker.unlock(&ctx).await.unwrap_err();
    assert!(matches!(err, LockError::InvalidState { operation: "unlock", .. }));
    assert_eq!(locker.state(), LockerState::Unlocked);

    locker.lock(&ctx).await.unwrap();
    let err = locker.lock(&ctx).await.unwrap_err();
    assert!(matches!(err, LockError::InvalidState { operation: "lock", .. }));
    let err = locker.try_lock(&ctx).await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(locker.state(), LockerState::Locked);

    locker.unlock(&ctx).await.unwrap();
}

/// A held key blocks other lockers; a distinct key does not.
async fn check_contention_and_independence<C: Coordinator>(coordinator: &C) {
    let ctx = Context::background();
    let holder = coordinator.new_locker(&ctx, Key::from("shared")).unwrap();
    holder.lock(&ctx).await.unwrap();

    let contender = coordinator.new_locker(&ctx, Key::from("shared")).unwrap();
    assert!(!contender.try_lock(&ctx).await.unwrap());
    let err = contender
        .lock(&Context::with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(contender.state(), LockerState::Unlocked);

    let other = coordinator.new_locker(&ctx, Key::from("other")).unwrap();
    tokio::time::timeout(Duration::from_secs(1), other.lock(&ctx))
        .await
        .expect("distinct key must not block")
        .unwrap();

    other.unlock(&ctx).await.unwrap();
    holder.unlock(&ctx).await.unwrap();
}

/// Invalid inputs to `new_locker`.
fn check_new_locker_rejections<C: Coordinator>(coordinator: &C) {
    let err = coordinator
        .new_locker(&Context::background(), Key::from(""))
        .err()
        .unwrap();
    assert!(matches!(err, LockError::InvalidKey(_)));

    let ctx = Context::background();
    ctx.cancel();
    let err = coordinator.new_locker(&ctx, Key::from("doc")).err().unwrap();
    assert!(err.is_canceled());
}

async fn check_with_lock<C: Coordinator>(coordinator: &C) {
    let ctx = Context::background();
    let output = coordinator
        .with_lock(&ctx, Key::from("section"), || async { "done" })
        .await
        .unwrap();
    assert_eq!(output, "done");

    let locker = coordinator.new_locker(&ctx, Key::from("section")).unwrap();
    assert!(locker.try_lock(&ctx).await.unwrap());
    locker.unlock(&ctx).await.unwrap();
}

async fn check_contract<C: Coordinator>(coordinator: &C) {
    check_lock_cycle(coordinator).await;
    check_state_guards(coordinator).await;
    check_contention_and_independence(coordinator).await;
    check_new_locker_rejections(coordinator);
    check_with_lock(coordinator).await;
}

#[tokio::test]
async fn test_memory_coordinator_contract() {
    let coordinator = MemoryCoordinator::default();
    check_contract(&coordinator).await;
}

#[tokio::test]
async fn test_distributed_coordinator_contract() {
    let store = MemoryLeaseStore::new();
    let coordinator = common::distributed(&store, "contract", Duration::from_secs(3));
    check_contract(&coordinator).await;
    assert_eq!(store.lease_count(), 0);
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn test_backend_swappability() {
    async fn critical_section<C: Coordinator>(coordinator: &C) -> usize {
        let ctx = Context::background();
        coordinator
            .with_lock(&ctx, Key::from("swap"), || async { 1 })
            .await
            .unwrap()
    }

    let memory = MemoryCoordinator::default();
    let distributed =
        common::distributed(&MemoryLeaseStore::new(), "swap", Duration::from_secs(3));
    assert_eq!(critical_section(&memory).await + critical_section(&distributed).await, 2);
}
