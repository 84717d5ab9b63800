//! Core traits and types for keyed lock coordination.
//!
//! A [`Coordinator`] hands out single-use [`Locker`]s bound to a [`Key`].
//! Backends differ in how far their exclusion reaches (one process, or every
//! process sharing a coordination store) but honour the same contract.

pub mod backoff;
pub mod context;
pub mod error;
pub mod key;
pub mod prelude;
pub mod state;
pub mod traits;

pub use backoff::Backoff;
pub use context::Context;
pub use error::{LockError, LockResult};
pub use key::{AgentInfo, Key};
pub use state::{LockerState, StateMachine, Transition};
pub use traits::{Coordinator, CoordinatorExt, Locker};
