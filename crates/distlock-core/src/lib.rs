//! Distlock Core Library
//!
//! This crate provides named reader-writer locks keyed by integer resource
//! ids, including:
//! - The `LockMechanism` contract and an in-process reference mechanism
//! - RAII lock handles with timeout-bounded acquisition
//! - Startup-time mechanism selection through a registry
//! - Scoped lock requests for units of work
//! - TOML configuration with environment overrides

pub mod config;
pub mod domain;
pub mod error;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LockingConfig;
    pub use crate::domain::locking::{
        well_known, DistributedLocking, LockConfig, LockError, LockHandle, LockId,
        LockMechanism, LockMode, LockResult, LockScope, MechanismRegistry,
    };
    pub use crate::error::{Error, Result};
}
