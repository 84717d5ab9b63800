//! Lease-backed distributed backend for keyed lock coordination.
//!
//! Each held lock is a record under `/locks/{key}` in a consensus-backed
//! store, attached to a lease that the holder keeps alive in the background.
//! The protocol is written against the [`LeaseStore`] trait; enable the
//! `etcd` feature for the etcd v3 adapter, or use [`MemoryLeaseStore`] to run
//! the same protocol in-process.

pub mod config;
pub mod coordinator;
mod keepalive;
pub mod locker;
mod mutex;
pub mod record;
pub mod store;

pub use config::EtcdConfig;
pub use coordinator::{
    DEFAULT_LOCK_LEASE_TIME, DEFAULT_RELEASE_TIMEOUT, DistributedCoordinator,
    DistributedCoordinatorBuilder, LeaseSettings,
};
pub use locker::DistributedLocker;
pub use record::{LOCKS_PATH, LockRecord, record_key};
pub use store::{CreateOutcome, HolderRecord, LeaseId, LeaseRenewer, LeaseStore};
pub use store::{MemoryLeaseRenewer, MemoryLeaseStore};

#[cfg(feature = "etcd")]
pub use store::{EtcdLeaseRenewer, EtcdStore};

/// Coordinator backed by an etcd v3 cluster.
#[cfg(feature = "etcd")]
pub type EtcdCoordinator = DistributedCoordinator<EtcdStore>;

/// Locker handed out by an [`EtcdCoordinator`].
#[cfg(feature = "etcd")]
pub type EtcdLocker = DistributedLocker<EtcdStore>;

#[cfg(feature = "etcd")]
impl DistributedCoordinator<EtcdStore> {
    /// Connects to the cluster described by `config`.
    ///
    /// The dial timeout also bounds the remote part of each release.
    #[tracing::instrument(skip(config, agent), fields(agent = %agent, backend = "etcd"))]
    pub async fn dial(
        config: &EtcdConfig,
        agent: sync_coordinator_core::AgentInfo,
    ) -> sync_coordinator_core::LockResult<Self> {
        config.validate()?;
        let store = EtcdStore::connect(config).await?;
        DistributedCoordinator::builder(store)
            .agent(agent)
            .lease_ttl(config.lock_lease_time())
            .release_timeout(config.dial_timeout())
            .build()
    }
}
