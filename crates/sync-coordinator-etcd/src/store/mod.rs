//! Boundary to the consensus-backed coordination store.
//!
//! The locking protocol only needs a handful of primitives: leases with a TTL
//! and keep-alive, a create-if-absent write that attaches a lease, a
//! conditional delete, and a notification when a key is deleted. Anything
//! that provides these can back a [`DistributedCoordinator`].
//!
//! [`DistributedCoordinator`]: crate::DistributedCoordinator

use std::fmt;
use std::future::Future;
use std::time::Duration;

use sync_coordinator_core::error::LockResult;

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

#[cfg(feature = "etcd")]
pub use etcd::{EtcdLeaseRenewer, EtcdStore};
pub use memory::{MemoryLeaseRenewer, MemoryLeaseStore};

/// Identifier of a lease granted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A lock record as seen by a competitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderRecord {
    /// Lease the record is attached to.
    pub lease: LeaseId,
    /// Store revision at which the record was created.
    pub create_revision: i64,
    /// Raw record value.
    pub value: Vec<u8>,
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The record was written; the caller owns the key.
    Created {
        /// Store revision of the write.
        revision: i64,
    },
    /// The key already exists.
    Exists {
        /// The current record, if it was still present when read.
        holder: Option<HolderRecord>,
        /// Store revision at which the key was observed.
        revision: i64,
    },
}

/// Rounds `ttl` up to whole seconds, with a one second minimum.
pub fn round_up_to_secs(ttl: Duration) -> Duration {
    let secs = ttl.as_millis().div_ceil(1000).max(1);
    Duration::from_secs(secs as u64)
}

/// Renews one lease.
pub trait LeaseRenewer: Send + 'static {
    /// Sends one keep-alive.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ttl))` - The lease was renewed and now has `ttl` left
    /// * `Ok(None)` - The lease no longer exists
    /// * `Err(...)` - The renewal could not be confirmed
    fn renew(&mut self) -> impl Future<Output = LockResult<Option<Duration>>> + Send;
}

/// Client of a store that offers leases and atomic conditional writes.
///
/// Implementations are cheap to clone and share one connection. Every
/// failure to reach the store is reported as
/// [`LockError::BackendUnavailable`](sync_coordinator_core::LockError::BackendUnavailable).
pub trait LeaseStore: Clone + Send + Sync + 'static {
    /// Keep-alive handle type for this store.
    type Renewer: LeaseRenewer;

    /// TTL the store actually grants when asked for `ttl`.
    ///
    /// Stores with coarse lease granularity round up; the coordinator uses
    /// this value for keep-alive timing and staleness bounds.
    fn granted_ttl(&self, ttl: Duration) -> Duration {
        ttl
    }

    /// Grants a lease that expires after `ttl` unless renewed.
    fn grant(&self, ttl: Duration) -> impl Future<Output = LockResult<LeaseId>> + Send;

    /// Opens a keep-alive channel for `lease`.
    fn open_keep_alive(
        &self,
        lease: LeaseId,
    ) -> impl Future<Output = LockResult<Self::Renewer>> + Send;

    /// Revokes `lease`, deleting every key attached to it.
    ///
    /// Revoking a lease that has already expired succeeds.
    fn revoke(&self, lease: LeaseId) -> impl Future<Output = LockResult<()>> + Send;

    /// Writes `key = value` attached to `lease` only if `key` does not exist.
    fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> impl Future<Output = LockResult<CreateOutcome>> + Send;

    /// Deletes `key` only if it is attached to `lease`.
    ///
    /// Returns whether a record was deleted.
    fn delete_if_owned(
        &self,
        key: &str,
        lease: LeaseId,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Resolves once the record observed at `observed_revision` is gone.
    ///
    /// Resolves immediately if the key was already deleted or replaced.
    /// Dropping the future cancels the underlying watch.
    fn wait_deleted(
        &self,
        key: &str,
        observed_revision: i64,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Shuts the connection down. Later calls fail with
    /// `BackendUnavailable`. Closing twice succeeds.
    fn close(&self) -> impl Future<Output = LockResult<()>> + Send;
}
