//! Error types for distlock

use crate::domain::locking::LockError;
use thiserror::Error;

/// Result type alias using distlock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Distlock error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::Timeout { .. }) => {
                Some("Retry later or raise the timeout for this lock".to_string())
            }
            Self::Lock(LockError::Configuration { registered, .. }) => Some(format!(
                "Set `mechanism` in config.toml or DISTLOCK_MECHANISM to one of: {}",
                registered
            )),
            Self::Lock(LockError::NoMechanismRegistered) => {
                Some("Register a mechanism, e.g. MechanismRegistry::with_defaults()".to_string())
            }
            Self::ConfigError(_) => Some("Check DISTLOCK_CONFIG_DIR/config.toml".to_string()),
            _ => None,
        }
    }

    /// Whether this error is an expected lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_timeout())
    }
}

/// Config loading reports through `anyhow`; file system failures keep their kind.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<std::io::Error>() {
            Some(io) => Self::Io(std::io::Error::new(io.kind(), message)),
            None => Self::ConfigError(message),
        }
    }
}
