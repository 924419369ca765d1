//! Advisory file lock mechanism
//!
//! Each resource id maps to `<lock_dir>/lock_<id>.lock`. Read locks take a
//! shared lock on that file and write locks an exclusive one. The write holder
//! also records itself in `lock_<id>.holder.json` so that waiters timing out
//! can report who is in the way.

use async_trait::async_trait;
use distlock_core::domain::locking::{
    LockConfig, LockError, LockHandle, LockId, LockInfo, LockMechanism, LockMode, LockRelease,
    LockResult,
};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::FILE_MECHANISM;

/// Lock mechanism backed by `flock`-style advisory file locks
#[derive(Debug, Clone)]
pub struct FileLockMechanism {
    config: LockConfig,
}

impl FileLockMechanism {
    /// Create a mechanism storing lock files under `config.lock_dir`
    pub fn new(config: LockConfig) -> Self {
        Self { config }
    }

    /// Create a mechanism with a custom lock directory and default timeouts
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(LockConfig::default().with_lock_dir(dir))
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Path of the lock file for a resource
    pub fn lock_file_path(&self, lock_id: LockId) -> PathBuf {
        self.config.lock_dir.join(format!("lock_{}.lock", lock_id))
    }

    /// Path of the write holder record for a resource
    pub fn holder_file_path(&self, lock_id: LockId) -> PathBuf {
        self.config
            .lock_dir
            .join(format!("lock_{}.holder.json", lock_id))
    }

    /// Current write holder of a resource, if one is recorded
    pub fn current_holder(&self, lock_id: LockId) -> LockResult<Option<LockInfo>> {
        let path = self.holder_file_path(lock_id);
        match fs::read_to_string(&path) {
            Ok(contents) => LockInfo::from_json(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::IoError(format!(
                "Failed to read holder file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn describe_holder(&self, lock_id: LockId) -> String {
        match self.current_holder(lock_id) {
            Ok(Some(info)) => format!("write lock held by {}", info.holder()),
            Ok(None) => "held by another process".to_string(),
            Err(e) => {
                debug!(lock_id = %lock_id, error = %e, "Unreadable holder file");
                "held by another process".to_string()
            }
        }
    }

    fn open_lock_file(&self, lock_id: LockId) -> LockResult<File> {
        if !self.config.lock_dir.exists() {
            fs::create_dir_all(&self.config.lock_dir).map_err(|e| {
                LockError::IoError(format!("Failed to create lock directory: {}", e))
            })?;
        }

        let path = self.lock_file_path(lock_id);
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                LockError::IoError(format!("Failed to open lock file {}: {}", path.display(), e))
            })
    }

    async fn acquire(
        &self,
        lock_id: LockId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult<LockHandle> {
        let timeout = self.config.effective_timeout(mode, timeout);
        debug!(
            lock_id = %lock_id,
            mode = %mode,
            timeout_ms = timeout.as_millis() as u64,
            mechanism = FILE_MECHANISM,
            "Attempting to acquire lock"
        );

        let file = self.open_lock_file(lock_id)?;
        let start = Instant::now();

        loop {
            match try_lock(&file, mode) {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(LockError::IoError(format!(
                        "Failed to lock {}: {}",
                        self.lock_file_path(lock_id).display(),
                        e
                    )));
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                let holder = self.describe_holder(lock_id);
                warn!(
                    lock_id = %lock_id,
                    mode = %mode,
                    elapsed_ms = elapsed.as_millis() as u64,
                    holder = %holder,
                    "Lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    lock_id,
                    mode,
                    waited_ms: elapsed.as_millis() as u64,
                    holder,
                });
            }

            sleep(self.config.retry_interval.min(timeout - elapsed)).await;
        }

        let info = LockInfo::new(lock_id, mode, FILE_MECHANISM);
        let holder_file = match mode {
            LockMode::Read => None,
            LockMode::Write => {
                let path = self.holder_file_path(lock_id);
                if let Err(e) = write_holder_file(&path, &info) {
                    let _ = fs2::FileExt::unlock(&file);
                    return Err(e);
                }
                Some(path)
            }
        };

        debug!(
            lock_id = %lock_id,
            mode = %mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Lock acquired"
        );

        Ok(LockHandle::new(
            info,
            Box::new(FileRelease { file, holder_file }),
        ))
    }
}

#[async_trait]
impl LockMechanism for FileLockMechanism {
    fn name(&self) -> &str {
        FILE_MECHANISM
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

/// Unlocks the file and clears the holder record
struct FileRelease {
    file: File,
    holder_file: Option<PathBuf>,
}

impl LockRelease for FileRelease {
    fn release(self: Box<Self>, info: &LockInfo) {
        // The record goes first so the next writer never sees ours
        if let Some(path) = &self.holder_file {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(lock_id = %info.lock_id, error = %e, "Failed to remove holder file");
                }
            }
        }
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(lock_id = %info.lock_id, error = %e, "Failed to unlock lock file");
        }
    }
}

fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    match mode {
        LockMode::Read => fs2::FileExt::try_lock_shared(file),
        LockMode::Write => fs2::FileExt::try_lock_exclusive(file),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder_file(path: &Path, info: &LockInfo) -> LockResult<()> {
    fs::write(path, info.to_json()?)
        .map_err(|e| LockError::IoError(format!("Failed to write holder file: {}", e)))
}
