//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/freddie/` | `~/.local/share/freddie/` |
//! | Config | `~/Library/Application Support/freddie/` | `~/.config/freddie/` |
//!
//! # Environment Overrides
//!
//! - `FREDDIE_DATA_DIR` overrides [`data_dir`]
//! - `FREDDIE_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory (conversation record, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FREDDIE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("freddie"))
        .unwrap_or_else(|| PathBuf::from("/tmp/freddie-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FREDDIE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("freddie"))
        .unwrap_or_else(|| PathBuf::from("/tmp/freddie-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Log file directory under the given data root.
#[must_use]
pub fn logs_dir_in(data_root: &std::path::Path) -> PathBuf {
    data_root.join("logs")
}
