//! Lock record stored under a key while it is held.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sync_coordinator_core::error::{LockError, LockResult};
use sync_coordinator_core::key::{AgentInfo, Key};

use crate::store::LeaseId;

/// Prefix under which lock records are written.
pub const LOCKS_PATH: &str = "/locks";

/// Returns the store key of the lock record for `key`.
pub fn record_key(key: &Key) -> String {
    format!("{}/{}", LOCKS_PATH, key)
}

/// Attribution written as the lock record's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    #[serde(rename = "agentId")]
    pub agent_id: String,

    #[serde(rename = "leaseId")]
    pub lease_id: i64,

    #[serde(rename = "acquiredAt")]
    pub acquired_at_ms: u64,
}

impl LockRecord {
    pub fn new(agent: &AgentInfo, lease: LeaseId) -> Self {
        let acquired_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            agent_id: agent.id.clone(),
            lease_id: lease.0,
            acquired_at_ms,
        }
    }

    pub fn encode(&self) -> LockResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(LockError::backend)
    }

    /// Decodes a record written by any agent. Foreign or corrupt values yield
    /// `None`; they are only used for diagnostics.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_layout() {
        assert_eq!(record_key(&Key::from("doc/1")), "/locks/doc/1");
    }

    #[test]
    fn test_decode_written_record() {
        let record = LockRecord::new(&AgentInfo::new("agent-7"), LeaseId(42));
        let bytes = record.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"agentId\":\"agent-7\""));
        assert_eq!(LockRecord::decode(&bytes), Some(record));
        assert_eq!(LockRecord::decode(b"not json"), None);
    }
}
