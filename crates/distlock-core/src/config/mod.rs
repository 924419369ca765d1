//! Configuration management with file persistence

use crate::domain::locking::{DistributedLocking, LockConfig, MechanismRegistry};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

/// Environment variable naming the mechanism to use
pub const MECHANISM_ENV: &str = "DISTLOCK_MECHANISM";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "DISTLOCK_CONFIG_DIR";

/// Distlock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Registered mechanism name; unset selects the first registered one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<String>,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub lock_dir: PathBuf,
}

impl Default for LockingConfig {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            mechanism: None,
            read_timeout_ms: defaults.default_read_timeout.as_millis() as u64,
            write_timeout_ms: defaults.default_write_timeout.as_millis() as u64,
            retry_interval_ms: defaults.retry_interval.as_millis() as u64,
            lock_dir: defaults.lock_dir,
        }
    }
}

impl LockingConfig {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("distlock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the config file and the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let mut config: LockingConfig = toml::from_str(contents)?;
        config.mechanism = normalize_mechanism(config.mechanism);
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // An empty value means "not configured", not "keep the file's value"
        if let Some(value) = lookup(MECHANISM_ENV) {
            self.mechanism = normalize_mechanism(Some(value));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(anyhow!("retry_interval_ms must be greater than zero"));
        }
        if self.lock_dir.as_os_str().is_empty() {
            return Err(anyhow!("lock_dir must not be empty"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "mechanism" => Ok(self
                .mechanism
                .clone()
                .unwrap_or_else(|| "(not set - first registered mechanism)".to_string())),
            "read_timeout_ms" => Ok(self.read_timeout_ms.to_string()),
            "write_timeout_ms" => Ok(self.write_timeout_ms.to_string()),
            "retry_interval_ms" => Ok(self.retry_interval_ms.to_string()),
            "lock_dir" => Ok(self.lock_dir.display().to_string()),
            _ => Err(anyhow!("Unknown configuration key: {}", key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "mechanism" => {
                self.mechanism = normalize_mechanism(Some(value.to_string()));
            }
            "read_timeout_ms" => {
                self.read_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid read_timeout_ms value: {}", value))?;
            }
            "write_timeout_ms" => {
                self.write_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid write_timeout_ms value: {}", value))?;
            }
            "retry_interval_ms" => {
                let interval: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid retry_interval_ms value: {}", value))?;
                if interval == 0 {
                    return Err(anyhow!("retry_interval_ms must be greater than zero"));
                }
                self.retry_interval_ms = interval;
            }
            "lock_dir" => {
                if value.is_empty() {
                    return Err(anyhow!("lock_dir must not be empty"));
                }
                self.lock_dir = PathBuf::from(value);
            }
            _ => {
                return Err(anyhow!("Unknown configuration key: {}", key));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "mechanism",
            "read_timeout_ms",
            "write_timeout_ms",
            "retry_interval_ms",
            "lock_dir",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Runtime lock settings handed to mechanisms
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms))
            .with_retry_interval(Duration::from_millis(self.retry_interval_ms))
            .with_lock_dir(self.lock_dir.clone())
    }
}

fn normalize_mechanism(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DistributedLocking {
    /// Resolve the active mechanism from configuration
    pub fn from_config(
        registry: &MechanismRegistry,
        config: &LockingConfig,
    ) -> crate::Result<Self> {
        if let Err(e) = config.validate() {
            error!(error = %e, "Invalid locking configuration");
            return Err(crate::Error::ConfigError(e.to_string()));
        }
        Ok(Self::build(
            registry,
            config.mechanism.as_deref(),
            config.lock_config(),
        )?)
    }
}
