//! Lock keys and process identity.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LockError, LockResult};

/// Caller-chosen name of a lock domain.
///
/// Equal keys serialize against each other; unequal keys never block each
/// other. The coordinator never interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Creates a key, rejecting the empty string.
    pub fn new(key: impl Into<String>) -> LockResult<Self> {
        let key = Self(key.into());
        key.validate()?;
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the key is usable. Keys built through `From` are checked here
    /// when a locker is created.
    pub fn validate(&self) -> LockResult<()> {
        if self.0.is_empty() {
            return Err(LockError::InvalidKey("lock key cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identity of the coordinating process.
///
/// Created once at startup and shared read-only by every locker the process
/// creates. Used to attribute distributed lock records, never for access
/// control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Creates an identity with a random unique ID.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for AgentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
