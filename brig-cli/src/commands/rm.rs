//! `brig rm` command

use super::Builder;
use anyhow::{bail, Context, Result};
use brig_core::{Driver, DriverStatus};

/// Remove the builder container, and its state volume unless `rm_volume` is false.
pub async fn rm(builder: &Builder, force: bool, rm_volume: bool) -> Result<()> {
    let driver = &builder.driver;
    if !force && driver.status().await? == DriverStatus::Running {
        bail!("builder {} is running, stop it first or pass --force", builder.name);
    }

    driver
        .rm(force, rm_volume)
        .await
        .with_context(|| format!("removing builder {}", builder.name))?;

    if rm_volume {
        println!(
            "Builder removed: {} (state volume {} deleted)",
            builder.name,
            driver.state_volume()
        );
    } else {
        println!("Builder removed: {}", builder.name);
    }
    Ok(())
}
