//! etcd connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sync_coordinator_core::error::{LockError, LockResult};

use crate::coordinator::DEFAULT_LOCK_LEASE_TIME;

/// Connection and lease configuration for an etcd-backed coordinator.
///
/// Every field has a default, so a partial TOML/JSON table is enough:
///
/// ```toml
/// endpoints = ["etcd-1:2379", "etcd-2:2379", "etcd-3:2379"]
/// dial_timeout_ms = 5000
/// lock_lease_time_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Cluster endpoints.
    pub endpoints: Vec<String>,
    /// Connection timeout in milliseconds; also bounds remote release.
    pub dial_timeout_ms: u64,
    /// Lock lease TTL in milliseconds. etcd leases have second granularity.
    pub lock_lease_time_ms: u64,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            dial_timeout_ms: 5_000,
            lock_lease_time_ms: DEFAULT_LOCK_LEASE_TIME.as_millis() as u64,
            username: None,
            password: None,
        }
    }
}

impl EtcdConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn lock_lease_time(&self) -> Duration {
        Duration::from_millis(self.lock_lease_time_ms)
    }

    /// Lease TTL in whole seconds, rounded up.
    pub fn lock_lease_secs(&self) -> i64 {
        self.lock_lease_time_ms.div_ceil(1000) as i64
    }

    /// Checks the configuration can be used to dial.
    pub fn validate(&self) -> LockResult<()> {
        if self.endpoints.is_empty() {
            return Err(LockError::InvalidConfig("etcd endpoints cannot be empty".to_string()));
        }
        if self.endpoints.iter().any(|endpoint| endpoint.trim().is_empty()) {
            return Err(LockError::InvalidConfig("etcd endpoint cannot be blank".to_string()));
        }
        if self.dial_timeout_ms == 0 {
            return Err(LockError::InvalidConfig("dial timeout must be positive".to_string()));
        }
        if self.lock_lease_time_ms < 1_000 {
            return Err(LockError::InvalidConfig(format!(
                "lock lease time {}ms is below etcd's one second minimum",
                self.lock_lease_time_ms
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(LockError::InvalidConfig(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}
