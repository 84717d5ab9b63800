//! In-process lease store.
//!
//! Behaves like a single-member coordination store: leases expire on their
//! TTL, records attached to a lease vanish with it, and every deletion bumps
//! the store revision and wakes watchers. Lets the distributed protocol run
//! without an external service, and can simulate an unreachable store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sync_coordinator_core::error::{LockError, LockResult};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::{CreateOutcome, HolderRecord, LeaseId, LeaseRenewer, LeaseStore};

struct LeaseEntry {
    ttl: Duration,
    expires_at: Instant,
    keys: HashSet<String>,
}

struct StoredRecord {
    value: Vec<u8>,
    lease: LeaseId,
    create_revision: i64,
}

#[derive(Default)]
struct StoreState {
    revision: i64,
    next_lease: i64,
    leases: HashMap<LeaseId, LeaseEntry>,
    records: HashMap<String, StoredRecord>,
    /// Per-key change counters; waiters subscribe before releasing the lock.
    watchers: HashMap<String, watch::Sender<u64>>,
}

impl StoreState {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            debug!(lease = %id, "lease expired");
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        for key in lease.keys {
            self.delete_record(&key);
        }
        true
    }

    fn delete_record(&mut self, key: &str) {
        if self.records.remove(key).is_some() {
            self.revision += 1;
            self.notify(key);
        }
    }

    fn notify(&mut self, key: &str) {
        if let Some(sender) = self.watchers.get(key) {
            if sender.receiver_count() == 0 {
                self.watchers.remove(key);
            } else {
                sender.send_modify(|changes| *changes += 1);
            }
        }
    }

    fn notify_all(&mut self) {
        let keys: Vec<String> = self.watchers.keys().cloned().collect();
        for key in keys {
            self.notify(&key);
        }
    }

    fn subscribe(&mut self, key: &str) -> watch::Receiver<u64> {
        self.watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}

struct Shared {
    state: Mutex<StoreState>,
    available: AtomicBool,
    closed: AtomicBool,
}

/// Lease store kept entirely in process memory.
///
/// Clones share the same data, so several coordinators built on clones of
/// one store contend with each other just like separate processes sharing
/// a real store.
#[derive(Clone)]
pub struct MemoryLeaseStore {
    shared: Arc<Shared>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Simulates a partition: while unavailable every call fails with
    /// `BackendUnavailable`, and pending waits are woken to observe it.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
        if !available {
            self.shared.state.lock().notify_all();
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.purge_expired(Instant::now());
        state.leases.len()
    }

    /// Returns the record currently stored under `key`.
    pub fn holder_of(&self, key: &str) -> Option<HolderRecord> {
        let mut state = self.shared.state.lock();
        state.purge_expired(Instant::now());
        state.records.get(key).map(|record| HolderRecord {
            lease: record.lease,
            create_revision: record.create_revision,
            value: record.value.clone(),
        })
    }

    /// Current store revision.
    pub fn revision(&self) -> i64 {
        self.shared.state.lock().revision
    }

    fn ensure_reachable(&self) -> LockResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LockError::backend_msg("lease store is closed"));
        }
        if !self.is_available() {
            return Err(LockError::backend_msg("lease store is unreachable"));
        }
        Ok(())
    }

    fn renew_lease(&self, lease: LeaseId) -> LockResult<Option<Duration>> {
        self.ensure_reachable()?;
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        state.purge_expired(now);
        Ok(state.leases.get_mut(&lease).map(|entry| {
            entry.expires_at = now + entry.ttl;
            entry.ttl
        }))
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLeaseStore")
            .field("available", &self.is_available())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Keep-alive handle for a [`MemoryLeaseStore`] lease.
pub struct MemoryLeaseRenewer {
    store: MemoryLeaseStore,
    lease: LeaseId,
}

impl LeaseRenewer for MemoryLeaseRenewer {
    async fn renew(&mut self) -> LockResult<Option<Duration>> {
        self.store.renew_lease(self.lease)
    }
}

impl LeaseStore for MemoryLeaseStore {
    type Renewer = MemoryLeaseRenewer;

    async fn grant(&self, ttl: Duration) -> LockResult<LeaseId> {
        self.ensure_reachable()?;
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        state.purge_expired(now);
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            LeaseEntry {
                ttl,
                expires_at: now + ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn open_keep_alive(&self, lease: LeaseId) -> LockResult<Self::Renewer> {
        self.ensure_reachable()?;
        Ok(MemoryLeaseRenewer {
            store: self.clone(),
            lease,
        })
    }

    async fn revoke(&self, lease: LeaseId) -> LockResult<()> {
        self.ensure_reachable()?;
        let mut state = self.shared.state.lock();
        state.purge_expired(Instant::now());
        state.drop_lease(lease);
        Ok(())
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> LockResult<CreateOutcome> {
        self.ensure_reachable()?;
        let mut state = self.shared.state.lock();
        state.purge_expired(Instant::now());

        if !state.leases.contains_key(&lease) {
            return Err(LockError::backend_msg(format!("lease {} not found", lease)));
        }

        if let Some(existing) = state.records.get(key) {
            return Ok(CreateOutcome::Exists {
                holder: Some(HolderRecord {
                    lease: existing.lease,
                    create_revision: existing.create_revision,
                    value: existing.value.clone(),
                }),
                revision: state.revision,
            });
        }

        state.revision += 1;
        let revision = state.revision;
        state.records.insert(
            key.to_string(),
            StoredRecord {
                value,
                lease,
                create_revision: revision,
            },
        );
        if let Some(entry) = state.leases.get_mut(&lease) {
            entry.keys.insert(key.to_string());
        }
        Ok(CreateOutcome::Created { revision })
    }

    async fn delete_if_owned(&self, key: &str, lease: LeaseId) -> LockResult<bool> {
        self.ensure_reachable()?;
        let mut state = self.shared.state.lock();
        state.purge_expired(Instant::now());

        if state.records.get(key).is_none_or(|record| record.lease != lease) {
            return Ok(false);
        }
        state.delete_record(key);
        if let Some(entry) = state.leases.get_mut(&lease) {
            entry.keys.remove(key);
        }
        Ok(true)
    }

    async fn wait_deleted(&self, key: &str, observed_revision: i64) -> LockResult<()> {
        loop {
            self.ensure_reachable()?;
            let (mut changes, expires_at) = {
                let mut state = self.shared.state.lock();
                state.purge_expired(Instant::now());
                let Some(record) = state.records.get(key) else {
                    return Ok(());
                };
                if record.create_revision > observed_revision {
                    return Ok(());
                }
                let Some(expires_at) = state.leases.get(&record.lease).map(|l| l.expires_at)
                else {
                    return Ok(());
                };
                (state.subscribe(key), expires_at)
            };

            // Either someone touched the key or the holder's lease may have
            // lapsed; re-check in both cases.
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(LockError::backend_msg("watch closed"));
                    }
                }
                _ = tokio::time::sleep_until(expires_at) => {}
            }
        }
    }

    async fn close(&self) -> LockResult<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.state.lock().notify_all();
        }
        Ok(())
    }
}
