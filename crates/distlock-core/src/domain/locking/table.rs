//! Lazily populated map from resource id to its lock state

use super::state::LockState;
use super::types::{LockId, LockStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Thread-safe registry of `LockState` per `LockId`.
///
/// The table mutex only covers the map itself and is never held while a
/// caller waits for a lock.
#[derive(Debug, Default)]
pub struct LockTable {
    states: Mutex<HashMap<LockId, Arc<LockState>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<LockId, Arc<LockState>>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the state of `lock_id`, creating an empty one on first access.
    ///
    /// Concurrent first callers for the same id observe the same instance.
    pub fn get_or_create(&self, lock_id: LockId) -> Arc<LockState> {
        self.states()
            .entry(lock_id)
            .or_insert_with(|| Arc::new(LockState::new()))
            .clone()
    }

    /// Snapshot of a resource's counters, if it was ever touched
    pub fn status(&self, lock_id: LockId) -> Option<LockStatus> {
        let state = self.states().get(&lock_id).cloned();
        state.map(|s| s.status())
    }

    /// Number of resources with a state slot
    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }

    /// Drop slots that nobody holds, waits on, or references.
    ///
    /// A slot is only removed while the table is the sole owner of its `Arc`,
    /// and new references can only be handed out under the table mutex, so a
    /// concurrent acquirer either keeps the slot alive or creates a fresh one.
    pub fn prune_idle(&self) -> usize {
        let mut states = self.states();
        let before = states.len();
        states.retain(|_, state| Arc::strong_count(state) > 1 || !state.status().is_idle());
        let pruned = before - states.len();
        if pruned > 0 {
            debug!(pruned, remaining = states.len(), "Pruned idle lock states");
        }
        pruned
    }
}
