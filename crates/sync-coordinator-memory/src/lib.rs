//! In-process backend for keyed lock coordination.
//!
//! Lockers for the same key share one process-local mutex. There is no lease
//! or TTL: the mutex dies with the process, along with every locker that
//! referenced it. Use this backend for single-node deployments and tests.

pub mod coordinator;
pub mod locker;

pub use coordinator::MemoryCoordinator;
pub use locker::MemoryLocker;
