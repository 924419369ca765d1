//! In-process reference lock mechanism
//!
//! Grants read and write locks from a [`LockTable`] owned by the mechanism.
//! Waiting is done on the resource's own state, never on the table, so
//! contention on one id does not slow down any other id.

use super::guard::{LockHandle, LockRelease};
use super::mechanism::LockMechanism;
use super::state::{Entry, LockState, Waiter};
use super::table::LockTable;
use super::types::{LockConfig, LockError, LockId, LockInfo, LockMode, LockResult, LockStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Registration name of the in-memory mechanism
pub const IN_MEMORY_MECHANISM: &str = "InMemory";

/// Upper bound used when a caller-supplied timeout overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Lock mechanism coordinating tasks of a single process
#[derive(Debug)]
pub struct InMemoryLockMechanism {
    /// Configuration
    config: LockConfig,

    /// Resource states, shared with other mechanisms only when passed in explicitly
    table: Arc<LockTable>,
}

impl InMemoryLockMechanism {
    /// Create a new in-memory mechanism with its own lock table
    pub fn new(config: LockConfig) -> Self {
        Self::with_table(config, Arc::new(LockTable::new()))
    }

    /// Create an in-memory mechanism with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Create an in-memory mechanism over an existing lock table
    pub fn with_table(config: LockConfig, table: Arc<LockTable>) -> Self {
        Self { config, table }
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Get the lock table
    pub fn table(&self) -> &Arc<LockTable> {
        &self.table
    }

    /// Snapshot of a resource's counters
    pub fn status(&self, lock_id: LockId) -> Option<LockStatus> {
        self.table.status(lock_id)
    }

    /// Forget resources nobody holds or waits for
    pub fn prune_idle(&self) -> usize {
        self.table.prune_idle()
    }

    async fn acquire(
        &self,
        lock_id: LockId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        let timeout = self.config.effective_timeout(mode, timeout);
        let state = self.table.get_or_create(lock_id);
        let start = Instant::now();

        debug!(
            lock_id = %lock_id,
            mode = %mode,
            timeout_ms = timeout.as_millis() as u64,
            "Attempting to acquire lock"
        );

        if let Entry::Queued(waiter) = state.try_enter(mode) {
            let deadline = start
                .checked_add(timeout)
                .unwrap_or_else(|| start + FAR_FUTURE);
            let mut pending = PendingAcquire::new(&state, waiter);

            loop {
                let notified = state.notified();
                tokio::pin!(notified);
                // Register for the wake-up before re-checking, so a release in
                // between is observed either by the check or by the notify.
                notified.as_mut().enable();

                if state.try_grant_waiting(&waiter) {
                    pending.granted();
                    break;
                }

                if time::timeout_at(deadline, notified).await.is_err() {
                    if state.try_grant_waiting(&waiter) {
                        pending.granted();
                        break;
                    }
                    drop(pending);

                    let waited_ms = start.elapsed().as_millis() as u64;
                    let holder = state.status().describe_holders();
                    warn!(
                        lock_id = %lock_id,
                        mode = %mode,
                        waited_ms,
                        holder = %holder,
                        "Lock acquisition timed out"
                    );
                    return Err(LockError::Timeout {
                        lock_id,
                        mode,
                        waited_ms,
                        holder,
                    });
                }
            }
        }

        debug!(
            lock_id = %lock_id,
            mode = %mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Lock acquired"
        );

        Ok(LockHandle::new(
            LockInfo::new(lock_id, mode, IN_MEMORY_MECHANISM),
            Box::new(MemoryRelease { state }),
        ))
    }
}

impl Default for InMemoryLockMechanism {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl LockMechanism for InMemoryLockMechanism {
    fn name(&self) -> &str {
        IN_MEMORY_MECHANISM
    }

    async fn read_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        self.acquire(lock_id, LockMode::Read, timeout).await
    }

    async fn write_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        self.acquire(lock_id, LockMode::Write, timeout).await
    }
}

/// Release action of an in-memory handle
struct MemoryRelease {
    state: Arc<LockState>,
}

impl LockRelease for MemoryRelease {
    fn release(self: Box<Self>, info: &LockInfo) {
        self.state.release(info.mode);
    }
}

/// Waiter registration that is rolled back unless the lock was granted.
///
/// Covers both timeouts and futures dropped mid-wait.
struct PendingAcquire<'a> {
    state: &'a LockState,
    waiter: Waiter,
    armed: bool,
}

impl<'a> PendingAcquire<'a> {
    fn new(state: &'a LockState, waiter: Waiter) -> Self {
        Self {
            state,
            waiter,
            armed: true,
        }
    }

    fn granted(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.abandon(&self.waiter);
        }
    }
}
