//! Lock handles for RAII-style lock management
//!
//! Handles release their lock when dropped, ensuring proper cleanup even in
//! the presence of panics, early returns or cancelled futures.

use super::types::{LockId, LockInfo, LockMode};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// One-shot release action supplied by a mechanism.
///
/// Called exactly once per granted acquisition and must not block.
pub trait LockRelease: Send {
    fn release(self: Box<Self>, info: &LockInfo);
}

/// A granted read or write lock on one resource
///
/// The lock is released when the handle is dropped.
pub struct LockHandle {
    /// Information about the held lock
    info: LockInfo,

    /// Mechanism-specific release action, taken on release
    release: Option<Box<dyn LockRelease>>,
}

impl LockHandle {
    /// Create a new lock handle
    pub fn new(info: LockInfo, release: Box<dyn LockRelease>) -> Self {
        Self {
            info,
            release: Some(release),
        }
    }

    /// Get the handle ID
    pub fn id(&self) -> Uuid {
        self.info.id
    }

    /// Get the locked resource
    pub fn lock_id(&self) -> LockId {
        self.info.lock_id
    }

    /// Get the granted mode
    pub fn mode(&self) -> LockMode {
        self.info.mode
    }

    /// Name of the mechanism that granted the lock
    pub fn mechanism(&self) -> &str {
        &self.info.mechanism
    }

    /// Get the lock info
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Whether the lock is still held
    pub fn is_held(&self) -> bool {
        self.release.is_some()
    }

    /// How long the lock has been held
    pub fn held_for(&self) -> Duration {
        self.info.held_for()
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if let Some(release) = self.release.take() {
            release.release(&self.info);
            debug!(
                lock_id = %self.info.lock_id,
                mode = %self.info.mode,
                mechanism = %self.info.mechanism,
                held_ms = self.info.held_for().as_millis() as u64,
                "Lock released"
            );
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("info", &self.info)
            .field("held", &self.is_held())
            .finish()
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Lock[{}:{}]",
            match self.info.mode {
                LockMode::Read => "Read",
                LockMode::Write => "Write",
            },
            self.info.mechanism,
            self.info.lock_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRelease(Arc<AtomicUsize>);

    impl LockRelease for CountingRelease {
        fn release(self: Box<Self>, _info: &LockInfo) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn create_test_handle(mode: LockMode, releases: &Arc<AtomicUsize>) -> LockHandle {
        LockHandle::new(
            LockInfo::new(LockId(-338), mode, "Test"),
            Box::new(CountingRelease(releases.clone())),
        )
    }

    #[test]
    fn test_drop_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = create_test_handle(LockMode::Read, &releases);

        assert!(handle.is_held());
        assert_eq!(handle.lock_id(), LockId(-338));
        assert_eq!(handle.mode(), LockMode::Read);
        assert_eq!(handle.mechanism(), "Test");

        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_release_does_not_release_again_on_drop() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = create_test_handle(LockMode::Write, &releases);

        handle.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_on_panic() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cloned = releases.clone();

        let result = std::panic::catch_unwind(move || {
            let _handle = create_test_handle(LockMode::Write, &cloned);
            panic!("critical section failed");
        });

        assert!(result.is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_display() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = create_test_handle(LockMode::Write, &releases);

        assert_eq!(handle.to_string(), "WriteLock[Test:-338]");
    }
}
