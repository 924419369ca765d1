//! The lock contract every backend implements

use super::guard::LockHandle;
use super::types::{LockId, LockMode, LockResult};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// A concrete backend granting read and write locks per resource id.
///
/// Acquisition either grants the full mode or nothing. A `None` timeout means
/// the mechanism's configured default for that mode. Timing out is an expected
/// outcome and is reported as `LockError::Timeout`; retries are up to the caller.
///
/// Nested acquisition of a conflicting mode on an id the caller already holds
/// is not supported: it waits like any other request and times out.
#[async_trait]
pub trait LockMechanism: Send + Sync + fmt::Debug {
    /// Name the mechanism is registered under
    fn name(&self) -> &str;

    /// Acquire shared access to `lock_id`
    async fn read_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle>;

    /// Acquire exclusive access to `lock_id`
    async fn write_lock(
        &self,
        lock_id: LockId,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle>;

    /// Acquire `lock_id` in the given mode
    async fn lock(
        &self,
        lock_id: LockId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        match mode {
            LockMode::Read => self.read_lock(lock_id, timeout).await,
            LockMode::Write => self.write_lock(lock_id, timeout).await,
        }
    }
}
