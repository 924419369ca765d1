//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error(
        "Lock timeout: could not acquire {mode} lock on resource {lock_id} within {waited_ms}ms ({holder})"
    )]
    Timeout {
        lock_id: LockId,
        mode: LockMode,
        waited_ms: u64,
        holder: String,
    },

    /// The configured mechanism name was never registered
    #[error(
        "Configuration error: lock mechanism '{name}' is not registered (registered: {registered})"
    )]
    Configuration { name: String, registered: String },

    /// Selection was attempted on an empty registry
    #[error("Configuration error: no lock mechanism has been registered")]
    NoMechanismRegistered,

    /// The lock scope tree was already disposed
    #[error("Lock scope {0} is already disposed")]
    ScopeDisposed(Uuid),

    /// I/O error during lock operations
    #[error("Lock I/O error: {0}")]
    IoError(String),

    /// Holder information could not be decoded
    #[error("Lock holder information corrupted: {0}")]
    Corrupted(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::ScopeDisposed(_) => "E305",
            Self::IoError(_) => "E306",
            Self::Corrupted(_) => "E307",
            Self::Configuration { .. } => "E308",
            Self::NoMechanismRegistered => "E309",
        }
    }

    /// Whether the caller may reasonably try again later
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Opaque identifier of a logical resource.
///
/// Ids are chosen by callers; two different ids never contend with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(pub i32);

impl LockId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for LockId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access mode of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared access, any number of concurrent holders
    Read,
    /// Exclusive access, a single holder
    Write,
}

impl LockMode {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of one resource's in-memory lock state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub active_readers: u32,
    pub has_writer: bool,
    pub waiting_readers: u32,
    pub waiting_writers: u32,
}

impl LockStatus {
    /// Nobody holds or waits for the resource
    pub fn is_idle(&self) -> bool {
        self.active_readers == 0
            && !self.has_writer
            && self.waiting_readers == 0
            && self.waiting_writers == 0
    }

    /// Human readable description of the current holders, used in timeout errors
    pub fn describe_holders(&self) -> String {
        if self.has_writer {
            "held by a writer".to_string()
        } else if self.active_readers > 0 {
            format!("held by {} reader(s)", self.active_readers)
        } else if self.waiting_writers > 0 {
            format!("{} writer(s) queued ahead", self.waiting_writers)
        } else {
            "not held".to_string()
        }
    }
}

/// Information about one granted acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Handle ID, unique per acquisition
    pub id: Uuid,

    /// Resource the lock was granted on
    pub lock_id: LockId,

    /// Granted mode
    pub mode: LockMode,

    /// Name of the mechanism that granted the lock
    pub mechanism: String,

    /// Process ID of lock holder
    pub holder_pid: u32,

    /// Hostname of lock holder
    pub holder_host: String,

    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock info for the current process
    pub fn new(lock_id: LockId, mode: LockMode, mechanism: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lock_id,
            mode,
            mechanism: mechanism.into(),
            holder_pid: std::process::id(),
            holder_host: gethostname::gethostname().to_string_lossy().into_owned(),
            acquired_at: Utc::now(),
        }
    }

    /// How long the lock has been held so far
    pub fn held_for(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }

    /// Check if the lock is held by the current process
    pub fn is_held_by_self(&self) -> bool {
        self.holder_pid == std::process::id()
    }

    /// Short holder description, e.g. `pid:4242@build-01`
    pub fn holder(&self) -> String {
        format!("pid:{}@{}", self.holder_pid, self.holder_host)
    }

    /// Serialize for external stores (e.g. holder files)
    pub fn to_json(&self) -> LockResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LockError::IoError(format!("Failed to serialize lock info: {}", e)))
    }

    /// Parse holder information written by [`LockInfo::to_json`]
    pub fn from_json(contents: &str) -> LockResult<Self> {
        serde_json::from_str(contents)
            .map_err(|e| LockError::Corrupted(format!("Failed to parse lock info: {}", e)))
    }
}

/// Runtime configuration shared by all mechanisms
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Timeout used by read acquisitions that do not pass one
    pub default_read_timeout: Duration,

    /// Timeout used by write acquisitions that do not pass one
    pub default_write_timeout: Duration,

    /// Base directory for externally-backed mechanisms that store lock files
    pub lock_dir: PathBuf,

    /// Retry interval for mechanisms that poll an external store
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_read_timeout: Duration::from_secs(60),
            default_write_timeout: Duration::from_secs(5),
            lock_dir: PathBuf::from(".distlock/locks"),
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl LockConfig {
    /// Create a config with a custom lock directory
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Set the default read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.default_read_timeout = timeout;
        self
    }

    /// Set the default write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.default_write_timeout = timeout;
        self
    }

    /// Set the polling interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Resolve the effective timeout of an acquisition.
    ///
    /// `None` never means "wait forever": it falls back to the default of the mode.
    pub fn effective_timeout(&self, mode: LockMode, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(match mode {
            LockMode::Read => self.default_read_timeout,
            LockMode::Write => self.default_write_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new(LockId(-333), LockMode::Write, "InMemory");

        assert_eq!(info.lock_id, LockId(-333));
        assert_eq!(info.mode, LockMode::Write);
        assert_eq!(info.mechanism, "InMemory");
        assert_eq!(info.holder_pid, std::process::id());
        assert!(info.is_held_by_self());
        assert!(info.holder().starts_with(&format!("pid:{}@", std::process::id())));
    }

    #[test]
    fn test_lock_info_json() {
        let info = LockInfo::new(LockId(7), LockMode::Read, "File");
        let json = info.to_json().expect("Failed to serialize");
        assert!(json.contains("\"lock_id\": 7"));
        assert!(json.contains("\"mode\": \"read\""));

        let parsed = LockInfo::from_json(&json).expect("Failed to parse");
        assert_eq!(parsed.id, info.id);
        assert_eq!(parsed.lock_id, info.lock_id);

        let err = LockInfo::from_json("{not json").unwrap_err();
        assert_eq!(err.code(), "E307");
    }

    #[test]
    fn test_lock_mode_display() {
        assert_eq!(LockMode::Read.to_string(), "read");
        assert_eq!(LockMode::Write.to_string(), "write");
    }

    #[test]
    fn test_lock_status_descriptions() {
        let writer = LockStatus {
            has_writer: true,
            ..LockStatus::default()
        };
        assert_eq!(writer.describe_holders(), "held by a writer");

        let readers = LockStatus {
            active_readers: 2,
            ..LockStatus::default()
        };
        assert_eq!(readers.describe_holders(), "held by 2 reader(s)");
        assert!(!readers.is_idle());
        assert!(LockStatus::default().is_idle());
    }

    #[test]
    fn test_lock_error_codes() {
        let timeout_err = LockError::Timeout {
            lock_id: LockId(1),
            mode: LockMode::Write,
            waited_ms: 50,
            holder: "held by a writer".to_string(),
        };
        assert_eq!(timeout_err.code(), "E300");
        assert!(timeout_err.is_timeout());
        assert!(timeout_err.to_string().contains("write lock on resource 1"));

        let config_err = LockError::Configuration {
            name: "Baz".to_string(),
            registered: "Foo, Bar".to_string(),
        };
        assert_eq!(config_err.code(), "E308");
        assert!(!config_err.is_timeout());
        assert!(config_err.to_string().contains("'Baz'"));
    }

    #[test]
    fn test_effective_timeout() {
        let config = LockConfig::default()
            .with_read_timeout(Duration::from_secs(30))
            .with_write_timeout(Duration::from_secs(2));

        assert_eq!(
            config.effective_timeout(LockMode::Read, None),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.effective_timeout(LockMode::Write, None),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.effective_timeout(LockMode::Write, Some(Duration::ZERO)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_lock_dir("/tmp/locks")
            .with_retry_interval(Duration::from_millis(10));

        assert_eq!(config.lock_dir, PathBuf::from("/tmp/locks"));
        assert_eq!(config.retry_interval, Duration::from_millis(10));
    }
}
