//! Distributed locker implementation.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::{LockError, LockResult};
use sync_coordinator_core::key::Key;
use sync_coordinator_core::state::{LockerState, StateMachine};
use sync_coordinator_core::traits::Locker;
use tokio::sync::watch;
use tracing::{Span, instrument, warn};

use crate::coordinator::Shared;
use crate::mutex::{self, HeldLock};
use crate::record::record_key;
use crate::store::LeaseStore;

/// Locker backed by a lease-guarded record in the coordination store.
///
/// While `Locked`, a background task keeps the lease alive. Dropping a locked
/// `DistributedLocker` stops the keep-alive without deleting the record, so
/// the key stays blocked until the lease TTL lapses, as if the process had
/// crashed. Call [`Locker::unlock`] to release promptly.
pub struct DistributedLocker<S: LeaseStore> {
    key: Key,
    record_key: String,
    shared: Arc<Shared<S>>,
    state: StateMachine,
    /// Present while `Locked`.
    held: Mutex<Option<HeldLock>>,
}

impl<S: LeaseStore> DistributedLocker<S> {
    pub(crate) fn new(key: Key, shared: Arc<Shared<S>>) -> Self {
        let record_key = record_key(&key);
        Self {
            key,
            record_key,
            shared,
            state: StateMachine::new(),
            held: Mutex::new(None),
        }
    }

    /// Store key of this locker's lock record.
    pub fn record_key(&self) -> &str {
        &self.record_key
    }

    fn ensure_open(&self) -> LockResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LockError::backend_msg("coordinator is closed"));
        }
        Ok(())
    }
}

impl<S: LeaseStore> Locker for DistributedLocker<S> {
    fn key(&self) -> &Key {
        &self.key
    }

    fn state(&self) -> LockerState {
        self.state.current()
    }

    #[instrument(skip(self, ctx), fields(lock.key = %self.key, backend = "distributed", agent = %self.shared.agent, elapsed_ms = tracing::field::Empty))]
    async fn lock(&self, ctx: &Context) -> LockResult<()> {
        let transition = self.state.begin_lock()?;
        ctx.check()?;
        self.ensure_open()?;
        let start = std::time::Instant::now();

        let held = mutex::acquire(&self.shared, &self.key, &self.record_key, ctx).await?;
        *self.held.lock() = Some(held);
        transition.commit();

        Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(lock.key = %self.key, backend = "distributed", agent = %self.shared.agent))]
    async fn try_lock(&self, ctx: &Context) -> LockResult<bool> {
        let transition = self.state.begin_lock()?;
        ctx.check()?;
        self.ensure_open()?;

        match mutex::try_acquire(&self.shared, &self.key, &self.record_key, ctx).await? {
            Some(held) => {
                *self.held.lock() = Some(held);
                transition.commit();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Releases the lock.
    ///
    /// The remote release is bounded by the coordinator's release timeout,
    /// not by `ctx`, so a nearly expired context still releases.
    #[instrument(skip(self, _ctx), fields(lock.key = %self.key, backend = "distributed", agent = %self.shared.agent))]
    async fn unlock(&self, _ctx: &Context) -> LockResult<()> {
        let transition = self.state.begin_unlock()?;
        let held = self.held.lock().take();

        let result = match held {
            Some(held) => mutex::release(&self.shared, &self.key, &self.record_key, held).await,
            None => Ok(()),
        };
        transition.commit();

        if let Err(e) = &result {
            warn!(
                lock.key = %self.key,
                error = %e,
                "lock released locally but its record could not be deleted, it expires with the lease"
            );
        }
        result
    }

    /// Tracks the lease of the lock held now. Without a held lock the
    /// returned receiver is closed and stays `false`.
    fn lost_token(&self) -> watch::Receiver<bool> {
        match self.held.lock().as_ref() {
            Some(held) => held.keep_alive.lost_token(),
            None => watch::channel(false).1,
        }
    }
}

impl<S: LeaseStore> Drop for DistributedLocker<S> {
    fn drop(&mut self) {
        if self.held.get_mut().is_some() {
            warn!(
                lock.key = %self.key,
                ttl_ms = self.shared.settings.lease_ttl.as_millis() as u64,
                "locker dropped while locked, the lock is held until its lease expires"
            );
        }
    }
}
