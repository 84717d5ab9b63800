//! Core traits for lock coordination.

use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

use crate::context::Context;
use crate::error::LockResult;
use crate::key::Key;
use crate::state::LockerState;

// ============================================================================
// Locker Trait
// ============================================================================

/// A single-use exclusive lock handle bound to one key.
///
/// A fresh locker is obtained per critical section. States move strictly
/// `Unlocked → Locking → Locked → Unlocking → Unlocked`; calls out of order
/// return [`LockError::InvalidState`](crate::LockError::InvalidState) without
/// side effects.
///
/// # Example
///
/// ```rust,ignore
/// let locker = coordinator.new_locker(&ctx, Key::new("doc-42")?)?;
/// locker.lock(&ctx).await?;
/// // Critical section - no other locker for "doc-42" is locked
/// apply_changes().await;
/// if let Err(e) = locker.unlock(&ctx).await {
///     tracing::warn!(error = %e, "release degraded");
/// }
/// ```
pub trait Locker: Send + Sync {
    /// Returns the key this locker is bound to.
    fn key(&self) -> &Key;

    /// Returns the current state.
    fn state(&self) -> LockerState;

    /// Blocks until exclusive ownership of the key is obtained.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The locker is `Locked`
    /// * `Err(LockError::Canceled)` - The context ended first; the locker is
    ///   `Unlocked` and no partial backend state remains
    /// * `Err(LockError::BackendUnavailable)` - The store failed; the locker
    ///   is `Unlocked`
    /// * `Err(LockError::InvalidState)` - The locker was not `Unlocked`
    fn lock(&self, ctx: &Context) -> impl Future<Output = LockResult<()>> + Send;

    /// Makes a single attempt to lock without waiting for a holder.
    ///
    /// Returns `Ok(false)` when the key is held elsewhere; the locker stays
    /// `Unlocked`.
    fn try_lock(&self, ctx: &Context) -> impl Future<Output = LockResult<bool>> + Send;

    /// Releases the lock.
    ///
    /// Only valid from `Locked`. The locker always ends `Unlocked`; an error
    /// reports that the remote release could not be confirmed.
    fn unlock(&self, ctx: &Context) -> impl Future<Output = LockResult<()>> + Send;

    /// Returns a receiver that yields `true` once a held lock is lost.
    ///
    /// Backends without a way to lose a held lock return a receiver that
    /// never changes from `false`.
    ///
    /// The receiver follows the lock held at the time of the call. Call it
    /// after `lock` succeeds: a receiver taken while `Unlocked` is already
    /// closed and never observes a later loss.
    fn lost_token(&self) -> watch::Receiver<bool>;
}

// ============================================================================
// Coordinator Trait
// ============================================================================

/// Factory for lockers, backed by process-local or distributed exclusion.
///
/// Chosen once at startup; application code stays backend-agnostic.
///
/// # Example
///
/// ```rust,ignore
/// async fn update<C: Coordinator>(coordinator: &C, ctx: &Context) -> LockResult<()> {
///     let locker = coordinator.new_locker(ctx, Key::new("doc-42")?)?;
///     locker.lock(ctx).await?;
///     // ...
///     locker.unlock(ctx).await
/// }
/// ```
pub trait Coordinator: Send + Sync {
    /// The locker type produced by this coordinator.
    type Locker: Locker;

    /// Creates an independent, not yet locked, locker for `key`.
    ///
    /// Never blocks.
    ///
    /// * `Err(LockError::Canceled)` - `ctx` is already done
    /// * `Err(LockError::BackendUnavailable)` - the backend is closed
    /// * `Err(LockError::InvalidKey)` - `key` is empty
    fn new_locker(&self, ctx: &Context, key: Key) -> LockResult<Self::Locker>;
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait providing convenience methods for coordinators.
pub trait CoordinatorExt: Coordinator {
    /// Creates a locker for `key` and locks it.
    fn lock_key(
        &self,
        ctx: &Context,
        key: Key,
    ) -> impl Future<Output = LockResult<Self::Locker>> + Send
    where
        Self: Sync,
    {
        async move {
            let locker = self.new_locker(ctx, key)?;
            locker.lock(ctx).await?;
            Ok(locker)
        }
    }

    /// Runs `critical_section` while holding the lock for `key`.
    ///
    /// The lock is released after the section completes. A failed release is
    /// logged at warn and does not discard the section's output: the section
    /// already ran under exclusion.
    fn with_lock<F, Fut, T>(
        &self,
        ctx: &Context,
        key: Key,
        critical_section: F,
    ) -> impl Future<Output = LockResult<T>> + Send
    where
        Self: Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        async move {
            let locker = self.lock_key(ctx, key).await?;
            let output = critical_section().await;
            if let Err(e) = locker.unlock(ctx).await {
                warn!(lock.key = %locker.key(), error = %e, "critical section completed but release failed");
            }
            Ok(output)
        }
    }
}

// Blanket implementation for all Coordinators
impl<T: Coordinator> CoordinatorExt for T {}
