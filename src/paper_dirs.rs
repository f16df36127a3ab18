//! Centralized application directory paths for TaskPaper.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/taskpaper/` | `~/.local/share/taskpaper/` |
//! | Config | `~/Library/Application Support/taskpaper/` | `~/.config/taskpaper/` |
//!
//! Overrides for tests and custom deployments:
//! - `TASKPAPER_DATA_DIR` overrides [`data_dir`]
//! - `TASKPAPER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root: wallpapers, ledger, logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKPAPER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("taskpaper"))
        .unwrap_or_else(|| PathBuf::from("/tmp/taskpaper-data"))
}

/// Application config directory (`config.toml`, calendar token).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKPAPER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("taskpaper"))
        .unwrap_or_else(|| PathBuf::from("/tmp/taskpaper-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Generated wallpaper directory (`data_dir()/wallpapers/`).
#[must_use]
pub fn wallpapers_dir() -> PathBuf {
    data_dir().join("wallpapers")
}

/// Artifact ledger file inside a wallpaper directory.
#[must_use]
pub fn ledger_file_in(dir: &std::path::Path) -> PathBuf {
    dir.join("ledger.json")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Calendar access token file (`config_dir()/token.json`).
#[must_use]
pub fn token_file() -> PathBuf {
    config_dir().join("token.json")
}
