//! Options of the docker-container driver.

use crate::error::{BrigError, Result};
use std::collections::HashMap;

/// Parsed `--driver-opt` values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Backend image; the stock BuildKit image when unset.
    pub image: Option<String>,
    /// Network mode of the backend container.
    pub network: Option<String>,
    /// Overrides the cgroup parent of the backend container.
    pub cgroup_parent: Option<String>,
    /// `KEY=value` pairs from `env.KEY` options, sorted by key.
    pub env: Vec<String>,
}

impl DriverOptions {
    /// Parse raw `key=value` options. Unknown keys are rejected.
    pub fn parse(raw: &HashMap<String, String>) -> Result<Self> {
        let mut opts = Self::default();
        let mut keys: Vec<&String> = raw.keys().collect();
        keys.sort();

        for key in keys {
            let value = &raw[key];
            match key.as_str() {
                "image" => opts.image = non_empty(value),
                "network" => opts.network = non_empty(value),
                "cgroup-parent" => opts.cgroup_parent = non_empty(value),
                k if k.starts_with("env.") => {
                    let name = &k["env.".len()..];
                    if name.is_empty() {
                        return Err(BrigError::InvalidConfig {
                            reason: "invalid env option \"env.\": missing variable name"
                                .to_string(),
                        });
                    }
                    opts.env.push(format!("{}={}", name, value));
                }
                other => {
                    return Err(BrigError::InvalidConfig {
                        reason: format!(
                            "invalid driver option {:?} for docker-container driver",
                            other
                        ),
                    })
                }
            }
        }
        Ok(opts)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
