//! Distributed read/write locking
//!
//! This module provides named reader-writer locks keyed by integer resource
//! ids, behind a pluggable mechanism chosen once per process.
//!
//! # Architecture
//!
//! - **Mechanisms**: `LockMechanism` trait, with `InMemoryLockMechanism` as
//!   the in-process reference implementation
//! - **Lock table**: per-id `LockState` created on first use
//! - **Handles**: RAII `LockHandle` releasing on drop
//! - **Selection**: `MechanismRegistry` resolving the active
//!   `DistributedLocking` at startup
//! - **Scopes**: `LockScope` batching requests for a unit of work
//!
//! # Example
//!
//! ```ignore
//! use distlock_core::domain::locking::{DistributedLocking, LockConfig, MechanismRegistry, well_known};
//!
//! let locking = DistributedLocking::build(&MechanismRegistry::with_defaults(), None, LockConfig::default())?;
//!
//! let handle = locking.write_lock(well_known::CONTENT_TREE, Some(Duration::from_secs(5))).await?;
//!
//! // Mutate the content tree...
//!
//! // Lock is released when the handle is dropped
//! ```

pub mod guard;
pub mod mechanism;
pub mod memory;
pub mod registry;
pub mod scope;
pub mod state;
pub mod table;
pub mod types;
pub mod well_known;

// Re-export main types
pub use guard::{LockHandle, LockRelease};
pub use mechanism::LockMechanism;
pub use memory::{InMemoryLockMechanism, IN_MEMORY_MECHANISM};
pub use registry::{DistributedLocking, MechanismFactory, MechanismRegistry};
pub use scope::{LockCounts, LockScope};
pub use state::{Entry, LockState, Waiter};
pub use table::LockTable;
pub use types::{LockConfig, LockError, LockId, LockInfo, LockMode, LockResult, LockStatus};
