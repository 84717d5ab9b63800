//! In-process coordinator implementation.

use std::sync::Arc;

use dashmap::DashMap;
use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::LockResult;
use sync_coordinator_core::key::{AgentInfo, Key};
use sync_coordinator_core::traits::Coordinator;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::locker::MemoryLocker;

/// Coordinator that serializes lockers through process-local mutexes.
///
/// One mutex is created per distinct key on first use and kept for the
/// lifetime of the coordinator. Waiters are served in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    /// Per-key mutexes, created lazily.
    registry: Arc<DashMap<Key, Arc<Mutex<()>>>>,
    /// Identity of this process, kept for diagnostics only.
    agent: Option<Arc<AgentInfo>>,
}

impl MemoryCoordinator {
    /// Creates a coordinator. The agent is optional: in-process locks need
    /// no attribution.
    pub fn new(agent: Option<AgentInfo>) -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            agent: agent.map(Arc::new),
        }
    }

    pub fn agent(&self) -> Option<&AgentInfo> {
        self.agent.as_deref()
    }

    /// Number of distinct keys that have been locked so far.
    pub fn key_count(&self) -> usize {
        self.registry.len()
    }

    /// Returns the shared mutex for `key`, creating it exactly once.
    fn primitive_for(&self, key: &Key) -> Arc<Mutex<()>> {
        if let Some(existing) = self.registry.get(key) {
            return existing.clone();
        }
        // `entry` holds the shard lock, so a racing first access for the same
        // key observes the mutex inserted here instead of creating its own.
        self.registry
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(lock.key = %key, "creating in-process lock primitive");
                Arc::new(Mutex::new(()))
            })
            .clone()
    }
}

impl Coordinator for MemoryCoordinator {
    type Locker = MemoryLocker;

    #[instrument(skip(self, ctx), fields(lock.key = %key, backend = "memory"))]
    fn new_locker(&self, ctx: &Context, key: Key) -> LockResult<Self::Locker> {
        ctx.check()?;
        key.validate()?;
        let mutex = self.primitive_for(&key);
        Ok(MemoryLocker::new(key, mutex))
    }
}
