//! File-backed lock mechanism for distlock
//!
//! Coordinates processes on one host (or on a shared filesystem with working
//! `flock` semantics) through one advisory lock file per resource id.
//!
//! ```ignore
//! let mut registry = MechanismRegistry::with_defaults();
//! distlock_fs::register(&mut registry);
//!
//! let locking = DistributedLocking::build(&registry, Some(distlock_fs::FILE_MECHANISM), config)?;
//! ```

pub mod mechanism;

pub use mechanism::FileLockMechanism;

use distlock_core::domain::locking::{LockMechanism, MechanismRegistry};
use std::sync::Arc;

/// Name the file mechanism is registered under
pub const FILE_MECHANISM: &str = "File";

/// Register the file mechanism, after any already registered ones
pub fn register(registry: &mut MechanismRegistry) -> &mut MechanismRegistry {
    registry.register(FILE_MECHANISM, |config| {
        Arc::new(FileLockMechanism::new(config.clone())) as Arc<dyn LockMechanism>
    })
}
