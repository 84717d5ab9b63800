//! Backend selected at startup.

use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::LockResult;
use sync_coordinator_core::key::{AgentInfo, Key};
use sync_coordinator_core::state::LockerState;
use sync_coordinator_core::traits::{Coordinator, Locker};
use sync_coordinator_etcd::{DistributedCoordinator, DistributedLocker, MemoryLeaseStore};
#[cfg(feature = "etcd")]
use sync_coordinator_etcd::{EtcdCoordinator, EtcdLocker};
use sync_coordinator_memory::{MemoryCoordinator, MemoryLocker};
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::config::{Backend, CoordinatorConfig};

/// A coordinator whose backend is chosen from configuration.
#[derive(Clone)]
pub enum AnyCoordinator {
    Memory(MemoryCoordinator),
    LocalLease(DistributedCoordinator<MemoryLeaseStore>),
    #[cfg(feature = "etcd")]
    Etcd(EtcdCoordinator),
}

impl AnyCoordinator {
    /// Builds the backend named by `config`.
    ///
    /// Fails with `InvalidConfig` when the `etcd` backend is requested from
    /// a build without the `etcd` feature.
    #[instrument(skip(config, agent), fields(backend = ?config.backend, agent = %agent))]
    pub async fn connect(config: &CoordinatorConfig, agent: AgentInfo) -> LockResult<Self> {
        config.validate()?;
        let coordinator = match config.backend {
            Backend::Memory => Self::Memory(MemoryCoordinator::new(Some(agent))),
            Backend::LocalLease => Self::LocalLease(
                DistributedCoordinator::builder(MemoryLeaseStore::new())
                    .agent(agent)
                    .lease_ttl(config.etcd.lock_lease_time())
                    .release_timeout(config.etcd.dial_timeout())
                    .build()?,
            ),
            #[cfg(feature = "etcd")]
            Backend::Etcd => Self::Etcd(EtcdCoordinator::dial(&config.etcd, agent).await?),
            #[cfg(not(feature = "etcd"))]
            Backend::Etcd => {
                return Err(sync_coordinator_core::LockError::InvalidConfig(
                    "the etcd backend requires the `etcd` feature".to_string(),
                ));
            }
        };
        info!("coordinator ready");
        Ok(coordinator)
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Memory(_) => Backend::Memory,
            Self::LocalLease(_) => Backend::LocalLease,
            #[cfg(feature = "etcd")]
            Self::Etcd(_) => Backend::Etcd,
        }
    }

    /// Shuts the backend down. Closing again succeeds.
    pub async fn close(&self) -> LockResult<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::LocalLease(coordinator) => coordinator.close().await,
            #[cfg(feature = "etcd")]
            Self::Etcd(coordinator) => coordinator.close().await,
        }
    }
}

impl Coordinator for AnyCoordinator {
    type Locker = AnyLocker;

    fn new_locker(&self, ctx: &Context, key: Key) -> LockResult<Self::Locker> {
        Ok(match self {
            Self::Memory(coordinator) => AnyLocker::Memory(coordinator.new_locker(ctx, key)?),
            Self::LocalLease(coordinator) => {
                AnyLocker::LocalLease(coordinator.new_locker(ctx, key)?)
            }
            #[cfg(feature = "etcd")]
            Self::Etcd(coordinator) => AnyLocker::Etcd(coordinator.new_locker(ctx, key)?),
        })
    }
}

/// Locker handed out by an [`AnyCoordinator`].
pub enum AnyLocker {
    Memory(MemoryLocker),
    LocalLease(DistributedLocker<MemoryLeaseStore>),
    #[cfg(feature = "etcd")]
    Etcd(EtcdLocker),
}

impl Locker for AnyLocker {
    fn key(&self) -> &Key {
        match self {
            Self::Memory(locker) => locker.key(),
            Self::LocalLease(locker) => locker.key(),
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.key(),
        }
    }

    fn state(&self) -> LockerState {
        match self {
            Self::Memory(locker) => locker.state(),
            Self::LocalLease(locker) => locker.state(),
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.state(),
        }
    }

    async fn lock(&self, ctx: &Context) -> LockResult<()> {
        match self {
            Self::Memory(locker) => locker.lock(ctx).await,
            Self::LocalLease(locker) => locker.lock(ctx).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.lock(ctx).await,
        }
    }

    async fn try_lock(&self, ctx: &Context) -> LockResult<bool> {
        match self {
            Self::Memory(locker) => locker.try_lock(ctx).await,
            Self::LocalLease(locker) => locker.try_lock(ctx).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.try_lock(ctx).await,
        }
    }

    async fn unlock(&self, ctx: &Context) -> LockResult<()> {
        match self {
            Self::Memory(locker) => locker.unlock(ctx).await,
            Self::LocalLease(locker) => locker.unlock(ctx).await,
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.unlock(ctx).await,
        }
    }

    fn lost_token(&self) -> watch::Receiver<bool> {
        match self {
            Self::Memory(locker) => locker.lost_token(),
            Self::LocalLease(locker) => locker.lost_token(),
            #[cfg(feature = "etcd")]
            Self::Etcd(locker) => locker.lost_token(),
        }
    }
}
