//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sync_coordinator::{
    AgentInfo, Context, Coordinator, CreateOutcome, DistributedCoordinator, Key, LeaseId,
    LeaseRenewer, LeaseStore, LockError, LockResult, Locker, MemoryLeaseRenewer, MemoryLeaseStore,
};
use sync_coordinator::store::round_up_to_secs;

/// Runs `workers` concurrent lock/increment/unlock cycles on `key`.
///
/// The increment is a separate load and store with a yield in between, so
/// two workers inside the critical section at once lose an update. Returns
/// the final counter value.
pub async fn run_counter_workers<C>(coordinator: &C, key: &str, workers: usize) -> usize
where
    C: Coordinator + Clone + 'static,
{
    let counter = Arc::new(AtomicUsize::new(0));
    increment_under_lock(coordinator, key, workers, counter.clone()).await;
    counter.load(Ordering::SeqCst)
}

/// Like [`run_counter_workers`], but increments a caller-owned counter.
pub async fn increment_under_lock<C>(
    coordinator: &C,
    key: &str,
    workers: usize,
    counter: Arc<AtomicUsize>,
) where
    C: Coordinator + Clone + 'static,
{
    let mut tasks = Vec::with_capacity(workers);

    for _ in 0..workers {
        let coordinator = coordinator.clone();
        let counter = counter.clone();
        let key = Key::from(key);
        tasks.push(tokio::spawn(async move {
            let ctx = Context::with_timeout(Duration::from_secs(60));
            let locker = coordinator.new_locker(&ctx, key)?;
            locker.lock(&ctx).await?;

            let seen = counter.load(Ordering::Relaxed);
            tokio::task::yield_now().await;
            counter.store(seen + 1, Ordering::Relaxed);

            locker.unlock(&ctx).await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
}

/// Distributed coordinator over an in-process store with a short lease.
pub fn distributed(
    store: &MemoryLeaseStore,
    agent: &str,
    lease_ttl: Duration,
) -> DistributedCoordinator<MemoryLeaseStore> {
    DistributedCoordinator::builder(store.clone())
        .agent(AgentInfo::new(agent))
        .lease_ttl(lease_ttl)
        .release_timeout(Duration::from_millis(500))
        .retry_backoff(Duration::from_millis(5), Duration::from_millis(50))
        .build()
        .unwrap()
}

/// Wraps a [`MemoryLeaseStore`] with injectable slowness and renewal faults.
#[derive(Clone)]
pub struct FaultyStore {
    pub inner: MemoryLeaseStore,
    /// Delay before `open_keep_alive` answers.
    pub keep_alive_delay: Duration,
    /// While set, keep-alives fail without reaching the inner store.
    pub fail_renewals: Arc<AtomicBool>,
    /// Report whole-second lease granularity.
    pub whole_second_leases: bool,
}

impl FaultyStore {
    pub fn new(inner: MemoryLeaseStore) -> Self {
        Self {
            inner,
            keep_alive_delay: Duration::ZERO,
            fail_renewals: Arc::new(AtomicBool::new(false)),
            whole_second_leases: false,
        }
    }
}

pub struct FaultyRenewer {
    inner: MemoryLeaseRenewer,
    fail: Arc<AtomicBool>,
}

impl LeaseRenewer for FaultyRenewer {
    async fn renew(&mut self) -> LockResult<Option<Duration>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LockError::backend_msg("keep-alive dropped"));
        }
        self.inner.renew().await
    }
}

impl LeaseStore for FaultyStore {
    type Renewer = FaultyRenewer;

    fn granted_ttl(&self, ttl: Duration) -> Duration {
        if self.whole_second_leases {
            round_up_to_secs(ttl)
        } else {
            ttl
        }
    }

    async fn grant(&self, ttl: Duration) -> LockResult<LeaseId> {
        self.inner.grant(ttl).await
    }

    async fn open_keep_alive(&self, lease: LeaseId) -> LockResult<Self::Renewer> {
        tokio::time::sleep(self.keep_alive_delay).await;
        Ok(FaultyRenewer {
            inner: self.inner.open_keep_alive(lease).await?,
            fail: self.fail_renewals.clone(),
        })
    }

    async fn revoke(&self, lease: LeaseId) -> LockResult<()> {
        self.inner.revoke(lease).await
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> LockResult<CreateOutcome> {
        self.inner.create_if_absent(key, value, lease).await
    }

    async fn delete_if_owned(&self, key: &str, lease: LeaseId) -> LockResult<bool> {
        self.inner.delete_if_owned(key, lease).await
    }

    async fn wait_deleted(&self, key: &str, observed_revision: i64) -> LockResult<()> {
        self.inner.wait_deleted(key, observed_revision).await
    }

    async fn close(&self) -> LockResult<()> {
        self.inner.close().await
    }
}
