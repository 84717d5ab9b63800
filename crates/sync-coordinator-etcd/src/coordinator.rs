//! Distributed coordinator implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sync_coordinator_core::backoff::{DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF};
use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::{LockError, LockResult};
use sync_coordinator_core::key::{AgentInfo, Key};
use sync_coordinator_core::traits::Coordinator;
use tracing::{debug, instrument};

use crate::locker::DistributedLocker;
use crate::store::LeaseStore;

/// Default TTL of a lock lease.
///
/// This is also the longest a crashed holder can keep a key blocked: the
/// worst-case wait for the next waiter after a crash or a failed release.
pub const DEFAULT_LOCK_LEASE_TIME: Duration = Duration::from_secs(30);

/// Default bound on the remote part of a release.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs of the lease protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    /// TTL of each lock lease.
    pub lease_ttl: Duration,
    /// Period between keep-alives; below `lease_ttl`.
    pub keep_alive_interval: Duration,
    /// Bound on remote release and lease revocation, independent of the
    /// caller's context.
    pub release_timeout: Duration,
    /// First retry delay after a backend error.
    pub retry_min: Duration,
    /// Retry delay cap.
    pub retry_max: Duration,
}

impl LeaseSettings {
    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            lease_ttl,
            keep_alive_interval: lease_ttl / 3,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            retry_min: DEFAULT_MIN_BACKOFF,
            retry_max: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.lease_ttl.is_zero() {
            return Err(LockError::InvalidConfig("lease ttl must be positive".to_string()));
        }
        if self.keep_alive_interval.is_zero() || self.keep_alive_interval >= self.lease_ttl {
            return Err(LockError::InvalidConfig(format!(
                "keep-alive interval {:?} must be positive and below the lease ttl {:?}",
                self.keep_alive_interval, self.lease_ttl
            )));
        }
        if self.release_timeout.is_zero() {
            return Err(LockError::InvalidConfig("release timeout must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self::with_lease_ttl(DEFAULT_LOCK_LEASE_TIME)
    }
}

/// State shared by a coordinator and every locker it created.
pub(crate) struct Shared<S> {
    pub(crate) store: S,
    pub(crate) agent: AgentInfo,
    pub(crate) settings: LeaseSettings,
    pub(crate) closed: AtomicBool,
}

/// Builder for distributed coordinator configuration.
pub struct DistributedCoordinatorBuilder<S> {
    store: S,
    agent: Option<AgentInfo>,
    settings: LeaseSettings,
    keep_alive_interval: Option<Duration>,
}

impl<S: LeaseStore> DistributedCoordinatorBuilder<S> {
    /// Creates a new builder with default settings.
    pub fn new(store: S) -> Self {
        Self {
            store,
            agent: None,
            settings: LeaseSettings::default(),
            keep_alive_interval: None,
        }
    }

    /// Sets the identity written into lock records. Defaults to a random one.
    pub fn agent(mut self, agent: AgentInfo) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Sets the lease TTL.
    ///
    /// Unless set explicitly, the keep-alive interval follows at a third of
    /// the TTL.
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.settings.lease_ttl = ttl;
        self
    }

    /// Sets the keep-alive interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Sets the bound on remote release.
    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.settings.release_timeout = timeout;
        self
    }

    /// Sets the backoff range used when the store returns errors.
    pub fn retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.settings.retry_min = min;
        self.settings.retry_max = max;
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> LockResult<DistributedCoordinator<S>> {
        let mut settings = self.settings;
        settings.lease_ttl = self.store.granted_ttl(settings.lease_ttl);
        settings.keep_alive_interval = self
            .keep_alive_interval
            .unwrap_or(settings.lease_ttl / 3);
        settings.validate()?;

        Ok(DistributedCoordinator {
            shared: Arc::new(Shared {
                store: self.store,
                agent: self.agent.unwrap_or_else(AgentInfo::generate),
                settings,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

/// Coordinator whose exclusion spans every process sharing the store.
///
/// Each locker maps onto a record attached to its own lease. A holder that
/// crashes or loses the store stops renewing its lease, and the store deletes
/// the record once the TTL lapses. Exclusion therefore degrades to "exclusive
/// for at least the lease TTL after the last successful keep-alive", never to
/// two holders at once.
///
/// Lockers must be unlocked or dropped before [`close`](Self::close);
/// lockers used after close fail with `BackendUnavailable`.
pub struct DistributedCoordinator<S: LeaseStore> {
    shared: Arc<Shared<S>>,
}

impl<S: LeaseStore> Clone for DistributedCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: LeaseStore> DistributedCoordinator<S> {
    /// Returns a new builder for configuring the coordinator.
    pub fn builder(store: S) -> DistributedCoordinatorBuilder<S> {
        DistributedCoordinatorBuilder::new(store)
    }

    /// Creates a coordinator with default settings.
    pub fn new(store: S, agent: AgentInfo) -> Self {
        let settings = LeaseSettings::with_lease_ttl(store.granted_ttl(DEFAULT_LOCK_LEASE_TIME));
        Self {
            shared: Arc::new(Shared {
                store,
                agent,
                settings,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn agent(&self) -> &AgentInfo {
        &self.shared.agent
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.shared.settings
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Upper bound on how long a key stays blocked after its holder crashed
    /// or failed to release.
    ///
    /// This is the lease TTL as the store grants it, so an etcd-backed
    /// coordinator reports the requested TTL rounded up to whole seconds.
    pub fn max_stale_lock_window(&self) -> Duration {
        self.shared.settings.lease_ttl
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the store connection. Closing again succeeds.
    #[instrument(skip(self), fields(agent = %self.shared.agent))]
    pub async fn close(&self) -> LockResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing distributed coordinator");
        self.shared.store.close().await
    }
}

impl<S: LeaseStore> Coordinator for DistributedCoordinator<S> {
    type Locker = DistributedLocker<S>;

    #[instrument(skip(self, ctx), fields(lock.key = %key, backend = "distributed"))]
    fn new_locker(&self, ctx: &Context, key: Key) -> LockResult<Self::Locker> {
        ctx.check()?;
        key.validate()?;
        if self.is_closed() {
            return Err(LockError::backend_msg("coordinator is closed"));
        }
        Ok(DistributedLocker::new(key, self.shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLeaseStore;

    #[test]
    fn test_builder_derives_keep_alive_interval() {
        let coordinator = DistributedCoordinator::builder(MemoryLeaseStore::new())
            .lease_ttl(Duration::from_secs(9))
            .build()
            .unwrap();
        assert_eq!(coordinator.settings().keep_alive_interval, Duration::from_secs(3));
        assert_eq!(coordinator.max_stale_lock_window(), Duration::from_secs(9));
    }

    #[test]
    fn test_builder_rejects_interval_above_ttl() {
        let result = DistributedCoordinator::builder(MemoryLeaseStore::new())
            .lease_ttl(Duration::from_secs(1))
            .keep_alive_interval(Duration::from_secs(2))
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_default_settings() {
        let settings = LeaseSettings::default();
        assert_eq!(settings.lease_ttl, DEFAULT_LOCK_LEASE_TIME);
        assert_eq!(settings.keep_alive_interval, Duration::from_secs(10));
        settings.validate().unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_new_lockers() {
        let coordinator = DistributedCoordinator::new(MemoryLeaseStore::new(), AgentInfo::new("a"));
        let ctx = Context::background();
        assert!(coordinator.new_locker(&ctx, Key::from("doc")).is_ok());

        coordinator.close().await.unwrap();
        coordinator.close().await.unwrap();
        assert!(coordinator.is_closed());

        let err = coordinator.new_locker(&ctx, Key::from("doc")).err().unwrap();
        assert!(matches!(err, LockError::BackendUnavailable(_)));
    }
}
