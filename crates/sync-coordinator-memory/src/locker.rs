//! In-process locker implementation.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::LockResult;
use sync_coordinator_core::key::Key;
use sync_coordinator_core::state::{LockerState, StateMachine};
use sync_coordinator_core::traits::Locker;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{Span, instrument};

/// Locker backed by a process-local mutex shared with every other locker for
/// the same key.
///
/// Dropping a locked `MemoryLocker` releases the mutex.
pub struct MemoryLocker {
    key: Key,
    mutex: Arc<Mutex<()>>,
    state: StateMachine,
    /// Held while `Locked`.
    guard: SyncMutex<Option<OwnedMutexGuard<()>>>,
    /// In-process locks cannot be lost; the sender only keeps the channel open.
    lost_sender: watch::Sender<bool>,
}

impl MemoryLocker {
    pub(crate) fn new(key: Key, mutex: Arc<Mutex<()>>) -> Self {
        let (lost_sender, _) = watch::channel(false);
        Self {
            key,
            mutex,
            state: StateMachine::new(),
            guard: SyncMutex::new(None),
            lost_sender,
        }
    }
}

impl Locker for MemoryLocker {
    fn key(&self) -> &Key {
        &self.key
    }

    fn state(&self) -> LockerState {
        self.state.current()
    }

    #[instrument(skip(self, ctx), fields(lock.key = %self.key, backend = "memory", elapsed_ms = tracing::field::Empty))]
    async fn lock(&self, ctx: &Context) -> LockResult<()> {
        let transition = self.state.begin_lock()?;
        let start = std::time::Instant::now();

        // Dropping the acquire future on cancellation removes this waiter
        // from the mutex queue.
        let guard = ctx.run(self.mutex.clone().lock_owned()).await?;
        *self.guard.lock() = Some(guard);
        transition.commit();

        Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(lock.key = %self.key, backend = "memory"))]
    async fn try_lock(&self, ctx: &Context) -> LockResult<bool> {
        let transition = self.state.begin_lock()?;
        ctx.check()?;

        match self.mutex.clone().try_lock_owned() {
            Ok(guard) => {
                *self.guard.lock() = Some(guard);
                transition.commit();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self, _ctx), fields(lock.key = %self.key, backend = "memory"))]
    async fn unlock(&self, _ctx: &Context) -> LockResult<()> {
        let transition = self.state.begin_unlock()?;
        let guard = self.guard.lock().take();
        drop(guard);
        transition.commit();
        Ok(())
    }

    fn lost_token(&self) -> watch::Receiver<bool> {
        self.lost_sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use sync_coordinator_core::error::LockError;

    fn locker(key: &str, mutex: &Arc<Mutex<()>>) -> MemoryLocker {
        MemoryLocker::new(Key::from(key), mutex.clone())
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mutex = Arc::new(Mutex::new(()));
        let locker = locker("doc", &mutex);
        let ctx = Context::background();

        assert_eq!(locker.state(), LockerState::Unlocked);
        locker.lock(&ctx).await.unwrap();
        assert_eq!(locker.state(), LockerState::Locked);
        locker.unlock(&ctx).await.unwrap();
        assert_eq!(locker.state(), LockerState::Unlocked);
    }

    #[tokio::test]
    async fn test_unlock_without_lock_is_invalid() {
        let mutex = Arc::new(Mutex::new(()));
        let locker = locker("doc", &mutex);
        let err = locker.unlock(&Context::background()).await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(locker.state(), LockerState::Unlocked);
    }

    #[tokio::test]
    async fn test_double_lock_is_invalid() {
        let mutex = Arc::new(Mutex::new(()));
        let locker = locker("doc", &mutex);
        let ctx = Context::background();
        locker.lock(&ctx).await.unwrap();
        let err = locker.lock(&ctx).await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(locker.state(), LockerState::Locked);
        locker.unlock(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_to_unlocked() {
        let mutex = Arc::new(Mutex::new(()));
        let holder = locker("doc", &mutex);
        let waiter = locker("doc", &mutex);
        let ctx = Context::background();
        holder.lock(&ctx).await.unwrap();

        let short = Context::with_timeout(Duration::from_millis(20));
        let err = waiter.lock(&short).await.unwrap_err();
        assert!(matches!(err, LockError::Canceled));
        assert_eq!(waiter.state(), LockerState::Unlocked);

        holder.unlock(&ctx).await.unwrap();
        waiter.lock(&ctx).await.unwrap();
        waiter.unlock(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_locked_locker_releases() {
        let mutex = Arc::new(Mutex::new(()));
        let ctx = Context::background();
        {
            let holder = locker("doc", &mutex);
            holder.lock(&ctx).await.unwrap();
        }
        let next = locker("doc", &mutex);
        assert!(next.try_lock(&ctx).await.unwrap());
        assert!(!*next.lost_token().borrow());
        next.unlock(&ctx).await.unwrap();
    }
}
