//! Convenience prelude for coordination types.

pub use crate::context::Context;
pub use crate::error::{LockError, LockResult};
pub use crate::key::{AgentInfo, Key};
pub use crate::state::LockerState;
pub use crate::traits::{Coordinator, CoordinatorExt, Locker};
