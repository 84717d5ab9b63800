//! Keyed mutual exclusion across tasks and processes.
//!
//! A [`Coordinator`] hands out single-use [`Locker`]s for string keys. Two
//! backends implement the same contract:
//!
//! - [`MemoryCoordinator`]: exclusion between tasks of one process.
//! - [`DistributedCoordinator`]: exclusion across every process sharing a
//!   lease-capable coordination store, etcd in production.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sync_coordinator::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = MemoryCoordinator::default();
//!     let ctx = Context::with_timeout(Duration::from_secs(5));
//!
//!     let locker = coordinator.new_locker(&ctx, Key::new("doc-42")?)?;
//!     locker.lock(&ctx).await?;
//!
//!     // Critical section - no other locker for "doc-42" is locked
//!     println!("Applying changes...");
//!
//!     locker.unlock(&ctx).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Choosing a backend at startup
//!
//! ```rust,no_run
//! use sync_coordinator::*;
//!
//! # async fn run() -> LockResult<()> {
//! let config = CoordinatorConfig::from_toml_str(
//!     r#"
//!     backend = "etcd"
//!
//!     [etcd]
//!     endpoints = ["etcd-1:2379", "etcd-2:2379", "etcd-3:2379"]
//!     lock_lease_time_ms = 15000
//!     "#,
//! )?;
//! let coordinator = AnyCoordinator::connect(&config, AgentInfo::generate()).await?;
//! coordinator
//!     .with_lock(&Context::background(), Key::new("doc-42")?, || async {
//!         // ...
//!     })
//!     .await?;
//! coordinator.close().await
//! # }
//! ```
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `sync-coordinator-core`: core traits and types
//! - `sync-coordinator-memory`: in-process backend
//! - `sync-coordinator-etcd`: lease-backed distributed backend
//!
//! For fine-grained control, you can depend on individual crates instead.

pub mod any;
pub mod config;

pub use any::{AnyCoordinator, AnyLocker};
pub use config::{Backend, CoordinatorConfig};

// Re-export core types and traits
pub use sync_coordinator_core::*;

// Re-export in-process backend
#[allow(ambiguous_glob_reexports)]
pub use sync_coordinator_memory::*;

// Re-export distributed backend
#[allow(ambiguous_glob_reexports)]
pub use sync_coordinator_etcd::*;
