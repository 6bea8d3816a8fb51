//! CLI command implementations

pub mod bootstrap;
pub mod inspect;
pub mod rm;
pub mod stop;

pub use bootstrap::bootstrap;
pub use inspect::inspect;
pub use rm::rm;
pub use stop::stop;

use anyhow::{anyhow, Context, Result};
use brig_core::{Config, DockerContainerDriver, DockerEngine, DriverOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builder selected on the command line.
pub struct Builder {
    pub name: String,
    pub driver: DockerContainerDriver,
}

impl Builder {
    /// Resolve the builder from configuration and `--driver-opt` overrides.
    pub fn new(config: &Config, name: Option<String>, overrides: &[String]) -> Result<Self> {
        let name = name.unwrap_or_else(|| config.default_builder.clone());
        let raw = merge_driver_opts(&config.driver_opts, overrides)?;
        let options = DriverOptions::parse(&raw)?;
        debug!(builder = %name, ?options, "Resolved builder");

        let engine = DockerEngine::connect().context("connecting to the Docker engine")?;
        let driver = DockerContainerDriver::new(name.clone(), Arc::new(engine), options)
            .with_flags(config.buildkitd_flags.clone())
            .with_readiness(config.readiness());

        Ok(Self { name, driver })
    }
}

fn merge_driver_opts(
    base: &HashMap<String, String>,
    overrides: &[String],
) -> Result<HashMap<String, String>> {
    let mut merged = base.clone();
    for opt in overrides {
        let (key, value) = opt
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid driver option format: {} (expected KEY=VALUE)", opt))?;
        merged.insert(key.trim().to_string(), value.to_string());
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let base: HashMap<String, String> =
            [("image".to_string(), "moby/buildkit:v0.12".to_string())].into_iter().collect();
        let overrides = ["image=moby/buildkit:master".to_string(), "env.FOO=a=b".to_string()];
        let merged = merge_driver_opts(&base, &overrides).unwrap();
        assert_eq!(merged["image"], "moby/buildkit:master");
        assert_eq!(merged["env.FOO"], "a=b");
    }

    #[test]
    fn test_override_without_equals_is_rejected() {
        let err = merge_driver_opts(&HashMap::new(), &["network".to_string()]).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }
}
