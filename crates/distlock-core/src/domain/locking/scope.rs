//! Scoped lock requests
//!
//! A `LockScope` collects read and write lock requests for a unit of work and
//! holds the resulting handles until the root scope is dropped. Requests can be
//! lazy (queued until [`LockScope::ensure_locks`]) or eager. Nested scopes
//! delegate to their root: each resource is requested from the mechanism at
//! most once per mode for the whole tree, while per-scope request counts are
//! kept for bookkeeping.
//!
//! A scope tree is meant to be driven by one logical task at a time.

use super::guard::LockHandle;
use super::mechanism::LockMechanism;
use super::types::{LockError, LockId, LockMode, LockResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Per-scope request counts: scope instance -> resource -> number of requests
pub type LockCounts = HashMap<Uuid, HashMap<LockId, u32>>;

#[derive(Debug, Clone, Copy)]
struct QueuedLock {
    mode: LockMode,
    timeout: Option<Duration>,
    instance_id: Uuid,
    lock_id: LockId,
}

#[derive(Debug, Default)]
struct ScopeState {
    queued: Vec<QueuedLock>,
    read_counts: LockCounts,
    write_counts: LockCounts,
    read_held: HashSet<LockId>,
    write_held: HashSet<LockId>,
    handles: Vec<LockHandle>,
    disposed: bool,
}

impl ScopeState {
    fn counts_mut(&mut self, mode: LockMode) -> &mut LockCounts {
        match mode {
            LockMode::Read => &mut self.read_counts,
            LockMode::Write => &mut self.write_counts,
        }
    }

    fn held_mut(&mut self, mode: LockMode) -> &mut HashSet<LockId> {
        match mode {
            LockMode::Read => &mut self.read_held,
            LockMode::Write => &mut self.write_held,
        }
    }
}

#[derive(Debug)]
struct ScopeShared {
    root_id: Uuid,
    mechanism: Arc<dyn LockMechanism>,
    state: Mutex<ScopeState>,
}

/// A unit of work holding locks until the root scope is dropped
pub struct LockScope {
    instance_id: Uuid,
    is_root: bool,
    shared: Arc<ScopeShared>,
}

impl LockScope {
    /// Create a new root scope acquiring through `mechanism`
    pub fn new(mechanism: Arc<dyn LockMechanism>) -> Self {
        let instance_id = Uuid::new_v4();
        Self {
            instance_id,
            is_root: true,
            shared: Arc::new(ScopeShared {
                root_id: instance_id,
                mechanism,
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    /// Create a nested scope. It must be dropped before its parent.
    pub fn child(&self) -> LockScope {
        LockScope {
            instance_id: Uuid::new_v4(),
            is_root: false,
            shared: self.shared.clone(),
        }
    }

    /// Unique ID of this scope
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_not_disposed(&self, state: &ScopeState) -> LockResult<()> {
        if state.disposed {
            Err(LockError::ScopeDisposed(self.shared.root_id))
        } else {
            Ok(())
        }
    }

    // ========== Lazy requests ==========

    /// Queue read locks, acquired on the next [`LockScope::ensure_locks`]
    pub fn read_lock(&self, lock_ids: &[LockId]) -> LockResult<()> {
        self.queue(LockMode::Read, None, lock_ids)
    }

    /// Queue a read lock with an explicit timeout
    pub fn read_lock_with_timeout(
        &self,
        timeout: Duration,
        lock_id: LockId,
    ) -> LockResult<()> {
        self.queue(LockMode::Read, Some(timeout), &[lock_id])
    }

    /// Queue write locks, acquired on the next [`LockScope::ensure_locks`]
    pub fn write_lock(&self, lock_ids: &[LockId]) -> LockResult<()> {
        self.queue(LockMode::Write, None, lock_ids)
    }

    /// Queue a write lock with an explicit timeout
    pub fn write_lock_with_timeout(
        &self,
        timeout: Duration,
        lock_id: LockId,
    ) -> LockResult<()> {
        self.queue(LockMode::Write, Some(timeout), &[lock_id])
    }

    fn queue(
        &self,
        mode: LockMode,
        timeout: Option<Duration>,
        lock_ids: &[LockId],
    ) -> LockResult<()> {
        let mut state = self.state();
        self.ensure_not_disposed(&state)?;
        state
            .queued
            .extend(lock_ids.iter().map(|&lock_id| QueuedLock {
                mode,
                timeout,
                instance_id: self.instance_id,
                lock_id,
            }));
        Ok(())
    }

    /// Acquire every queued request, in the order they were made.
    ///
    /// When an acquisition fails, the requests after it stay queued.
    pub async fn ensure_locks(&self) -> LockResult<()> {
        let queued = {
            let mut state = self.state();
            self.ensure_not_disposed(&state)?;
            std::mem::take(&mut state.queued)
        };

        for (i, request) in queued.iter().enumerate() {
            let result = self
                .acquire(request.instance_id, request.mode, request.timeout, request.lock_id)
                .await;
            if let Err(e) = result {
                let mut state = self.state();
                state.queued.splice(0..0, queued[i + 1..].iter().copied());
                return Err(e);
            }
        }
        Ok(())
    }

    // ========== Eager requests ==========

    /// Acquire read locks now
    pub async fn eager_read_lock(
        &self,
        timeout: Option<Duration>,
        lock_ids: &[LockId],
    ) -> LockResult<()> {
        for &lock_id in lock_ids {
            self.acquire(self.instance_id, LockMode::Read, timeout, lock_id)
                .await?;
        }
        Ok(())
    }

    /// Acquire write locks now
    pub async fn eager_write_lock(
        &self,
        timeout: Option<Duration>,
        lock_ids: &[LockId],
    ) -> LockResult<()> {
        for &lock_id in lock_ids {
            self.acquire(self.instance_id, LockMode::Write, timeout, lock_id)
                .await?;
        }
        Ok(())
    }

    async fn acquire(
        &self,
        instance_id: Uuid,
        mode: LockMode,
        timeout: Option<Duration>,
        lock_id: LockId,
    ) -> LockResult<()> {
        let needs_lock = {
            let mut state = self.state();
            self.ensure_not_disposed(&state)?;
            *state
                .counts_mut(mode)
                .entry(instance_id)
                .or_default()
                .entry(lock_id)
                .or_insert(0) += 1;
            match mode {
                // The tree's own write lock already covers reading.
                LockMode::Read if state.write_held.contains(&lock_id) => false,
                _ => state.held_mut(mode).insert(lock_id),
            }
        };

        // Only the first request for a resource reaches the mechanism.
        if !needs_lock {
            return Ok(());
        }

        match self.shared.mechanism.lock(lock_id, mode, timeout).await {
            Ok(handle) => {
                let mut state = self.state();
                if state.disposed {
                    drop(state);
                    drop(handle);
                    return Err(LockError::ScopeDisposed(self.shared.root_id));
                }
                state.handles.push(handle);
                Ok(())
            }
            Err(e) => {
                // We never got the lock, so forget the request entirely.
                let mut state = self.state();
                if let Some(counts) = state.counts_mut(mode).get_mut(&instance_id) {
                    counts.remove(&lock_id);
                }
                state.held_mut(mode).remove(&lock_id);
                Err(e)
            }
        }
    }

    // ========== Inspection ==========

    /// Read request counts of every live scope in the tree
    pub fn read_lock_counts(&self) -> LockCounts {
        self.state().read_counts.clone()
    }

    /// Write request counts of every live scope in the tree
    pub fn write_lock_counts(&self) -> LockCounts {
        self.state().write_counts.clone()
    }

    /// Number of lazy requests not yet acquired
    pub fn queued_len(&self) -> usize {
        self.state().queued.len()
    }

    /// Locks currently held by the tree, in acquisition order
    pub fn held_locks(&self) -> Vec<(LockId, LockMode)> {
        self.state()
            .handles
            .iter()
            .map(|h| (h.lock_id(), h.mode()))
            .collect()
    }
}

impl Drop for LockScope {
    fn drop(&mut self) {
        let (handles, undisposed) = {
            let mut state = self.state();
            state.read_counts.remove(&self.instance_id);
            state.write_counts.remove(&self.instance_id);

            // Requests made by this scope sit on top of the queue, since any
            // child that queued after us is already gone.
            while state
                .queued
                .last()
                .is_some_and(|q| q.instance_id == self.instance_id)
            {
                state.queued.pop();
            }

            if self.is_root {
                // Children must be dropped first, so any counts left belong to live children.
                let state = &mut *state;
                let undisposed: Vec<(LockMode, Uuid, HashMap<LockId, u32>)> = state
                    .read_counts
                    .drain()
                    .map(|(id, counts)| (LockMode::Read, id, counts))
                    .chain(
                        state
                            .write_counts
                            .drain()
                            .map(|(id, counts)| (LockMode::Write, id, counts)),
                    )
                    .filter(|(_, _, counts)| !counts.is_empty())
                    .collect();

                state.disposed = true;
                state.queued.clear();
                state.read_held.clear();
                state.write_held.clear();
                (std::mem::take(&mut state.handles), undisposed)
            } else {
                (Vec::new(), Vec::new())
            }
        };

        if !handles.is_empty() {
            debug!(scope = %self.instance_id, count = handles.len(), "Releasing scope locks");
        }
        for handle in handles.into_iter().rev() {
            handle.release();
        }

        if !undisposed.is_empty() {
            error!(
                scope = %self.instance_id,
                counts = ?undisposed,
                "Root lock scope dropped while child scopes still hold lock requests"
            );
        }
        debug_assert!(
            undisposed.is_empty(),
            "child lock scopes not dropped before their root: {:?}",
            undisposed
        );
    }
}

impl fmt::Debug for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockScope")
            .field("instance_id", &self.instance_id)
            .field("root_id", &self.shared.root_id)
            .field("mechanism", &self.shared.mechanism.name())
            .finish()
    }
}
