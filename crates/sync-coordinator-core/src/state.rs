//! Locker state machine.
//!
//! Transitions are strictly `Unlocked → Locking → Locked → Unlocking →
//! Unlocked`. Each in-flight transition is represented by a [`Transition`]
//! guard so that a dropped or failed operation always lands the locker in a
//! well-defined state.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{LockError, LockResult};

/// Observable state of a locker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockerState {
    #[default]
    Unlocked,
    Locking,
    Locked,
    Unlocking,
}

impl fmt::Display for LockerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unlocked => "unlocked",
            Self::Locking => "locking",
            Self::Locked => "locked",
            Self::Unlocking => "unlocking",
        };
        f.write_str(s)
    }
}

/// Thread-safe holder of a [`LockerState`].
#[derive(Debug, Default)]
pub struct StateMachine {
    state: Mutex<LockerState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn current(&self) -> LockerState {
        *self.state.lock()
    }

    /// Moves `Unlocked → Locking`.
    ///
    /// Committing the returned guard moves to `Locked`; dropping it rolls
    /// back to `Unlocked`.
    pub fn begin_lock(&self) -> LockResult<Transition<'_>> {
        self.begin("lock", LockerState::Unlocked, LockerState::Locking)?;
        Ok(Transition {
            machine: self,
            on_commit: LockerState::Locked,
            on_abort: LockerState::Unlocked,
            finished: false,
        })
    }

    /// Moves `Locked → Unlocking`.
    ///
    /// The returned guard ends in `Unlocked` whether it is committed or
    /// dropped: release never leaves the locker half-held.
    pub fn begin_unlock(&self) -> LockResult<Transition<'_>> {
        self.begin("unlock", LockerState::Locked, LockerState::Unlocking)?;
        Ok(Transition {
            machine: self,
            on_commit: LockerState::Unlocked,
            on_abort: LockerState::Unlocked,
            finished: false,
        })
    }

    fn begin(
        &self,
        operation: &'static str,
        from: LockerState,
        to: LockerState,
    ) -> LockResult<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(LockError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn set(&self, state: LockerState) {
        *self.state.lock() = state;
    }
}

/// An in-flight state transition.
#[must_use = "dropping a transition rolls it back"]
#[derive(Debug)]
pub struct Transition<'a> {
    machine: &'a StateMachine,
    on_commit: LockerState,
    on_abort: LockerState,
    finished: bool,
}

impl Transition<'_> {
    /// Completes the transition.
    pub fn commit(mut self) {
        self.finished = true;
        self.machine.set(self.on_commit);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.machine.set(self.on_abort);
        }
    }
}
