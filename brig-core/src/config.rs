//! Configuration management.

use crate::driver::container::{DriverOptions, ReadinessPolicy};
use crate::error::{BrigError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent configuration for brig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Builder used when none is named on the command line.
    pub default_builder: String,
    pub log_level: String,
    /// Raw docker-container driver options (`image`, `network`, ...).
    pub driver_opts: HashMap<String, String>,
    pub readiness_attempts: u32,
    pub readiness_backoff_ms: u64,
    /// Extra flags passed to `buildkitd`.
    pub buildkitd_flags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let readiness = ReadinessPolicy::default();
        Self {
            default_builder: "default".to_string(),
            log_level: "info".to_string(),
            driver_opts: HashMap::new(),
            readiness_attempts: readiness.max_attempts,
            readiness_backoff_ms: readiness.backoff_unit.as_millis() as u64,
            buildkitd_flags: Vec::new(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_path()
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| BrigError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| BrigError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BrigError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| BrigError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| BrigError::IoError { path: path.to_path_buf(), source: e })
    }

    pub fn validate(&self) -> Result<()> {
        if self.readiness_attempts == 0 {
            return Err(BrigError::InvalidConfig {
                reason: "readiness_attempts must be at least 1".to_string(),
            });
        }
        self.driver_options().map(|_| ())
    }

    pub fn driver_options(&self) -> Result<DriverOptions> {
        DriverOptions::parse(&self.driver_opts)
    }

    pub fn readiness(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts: self.readiness_attempts,
            backoff_unit: Duration::from_millis(self.readiness_backoff_ms),
        }
    }
}
