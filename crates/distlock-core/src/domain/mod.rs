//! Domain layer
//!
//! Contains the locking model and its in-process implementation.

pub mod locking;
