//! Startup configuration.

use serde::{Deserialize, Serialize};
use sync_coordinator_core::error::{LockError, LockResult};
use sync_coordinator_etcd::EtcdConfig;

/// Which backend [`AnyCoordinator::connect`](crate::AnyCoordinator::connect)
/// builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// In-process mutexes. Exclusion within this process only.
    #[default]
    Memory,
    /// The lease protocol over an in-process store. Exclusion within this
    /// process only; exercises the distributed code path without a cluster.
    LocalLease,
    /// The lease protocol over an etcd cluster. Requires the `etcd` feature.
    Etcd,
}

/// Top-level configuration, typically loaded from TOML:
///
/// ```toml
/// backend = "etcd"
///
/// [etcd]
/// endpoints = ["localhost:2379"]
/// dial_timeout_ms = 5000
/// lock_lease_time_ms = 30000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub backend: Backend,
    /// Used by the `etcd` backend; its lease time also applies to
    /// `local-lease`.
    pub etcd: EtcdConfig,
}

impl CoordinatorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> LockResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| LockError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LockResult<()> {
        match self.backend {
            Backend::Memory => Ok(()),
            Backend::LocalLease | Backend::Etcd => self.etcd.validate(),
        }
    }
}
