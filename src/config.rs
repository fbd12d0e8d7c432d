//! Configuration types for the freddie client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FreddieError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreddieConfig {
    /// Model backend connection settings.
    pub backend: BackendConfig,
    /// Catalog polling cadence.
    pub polling: PollingConfig,
    /// Conversation persistence settings.
    pub storage: StorageConfig,
    /// Transient notification settings.
    pub notifications: NotificationConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Model backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend API, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// Catalog polling cadence.
///
/// The monitor polls at `base_interval_ms` while nothing transfers and
/// tightens to `active_interval_ms` while at least one module is
/// downloading or retrying. The backend rewrites progress every 2 seconds,
/// so polling faster than that only returns duplicate snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Idle poll interval in milliseconds.
    pub base_interval_ms: u64,
    /// Poll interval in milliseconds while a download is active.
    pub active_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 5_000,
            active_interval_ms: 2_000,
        }
    }
}

impl PollingConfig {
    /// Idle interval as a [`Duration`].
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    /// Active-transfer interval as a [`Duration`].
    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(self.active_interval_ms)
    }
}

/// Conversation persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the conversation record. `None` uses [`crate::app_dirs::data_dir`].
    pub data_dir: Option<PathBuf>,
    /// Maximum number of conversations retained.
    pub max_conversations: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_conversations: crate::chat::store::MAX_CONVERSATIONS,
        }
    }
}

impl StorageConfig {
    /// Resolved data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::app_dirs::data_dir)
    }
}

/// Transient notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Lifetime of a notification published without an explicit duration.
    pub default_duration_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: crate::notify::DEFAULT_DURATION_MS,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write a daily-rolling log file under `data_dir/logs/`.
    pub file_logging: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl FreddieConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FreddieError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            FreddieError::Config(format!("failed to parse config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config at `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FreddieError::Config(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FreddieError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            FreddieError::Config(format!("failed to write config file {}: {e}", path.display()))
        })
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(FreddieError::Config("backend.base_url is empty".to_owned()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(FreddieError::Config(
                "backend.timeout_secs must be greater than zero".to_owned(),
            ));
        }
        if self.polling.active_interval_ms == 0 {
            return Err(FreddieError::Config(
                "polling.active_interval_ms must be greater than zero".to_owned(),
            ));
        }
        if self.polling.active_interval_ms > self.polling.base_interval_ms {
            return Err(FreddieError::Config(format!(
                "polling.active_interval_ms ({}) exceeds polling.base_interval_ms ({})",
                self.polling.active_interval_ms, self.polling.base_interval_ms
            )));
        }
        if self.storage.max_conversations == 0 {
            return Err(FreddieError::Config(
                "storage.max_conversations must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
