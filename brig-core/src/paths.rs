//! Centralized path configuration for brig.

use std::path::PathBuf;

/// Get the brig configuration directory.
///
/// Resolution order:
/// 1. `BRIG_CONFIG_DIR` environment variable
/// 2. the platform configuration directory (`~/.config/brig` on Linux)
/// 3. `~/.brig`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BRIG_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("brig");
    }
    dirs::home_dir().map(|h| h.join(".brig")).unwrap_or_else(|| PathBuf::from(".brig"))
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
