//! `brig stop` command

use super::Builder;
use anyhow::{Context, Result};
use brig_core::Driver;

pub async fn stop(builder: &Builder) -> Result<()> {
    builder
        .driver
        .stop(true)
        .await
        .with_context(|| format!("stopping builder {}", builder.name))?;
    println!("Builder stopped: {}", builder.name);
    Ok(())
}
