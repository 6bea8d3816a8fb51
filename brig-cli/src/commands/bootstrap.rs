//! `brig bootstrap` command

use super::Builder;
use anyhow::{Context, Result};
use brig_core::progress;
use brig_core::{Driver, Printer};
use colored::Colorize;

/// Bring the builder container up and wait until BuildKit answers.
pub async fn bootstrap(builder: &Builder) -> Result<()> {
    let (pw, rx) = progress::channel();
    let printer = tokio::spawn(Printer::new(std::io::stderr()).run(rx));

    let result = builder.driver.bootstrap(&pw).await;
    drop(pw);
    printer.await.context("progress printer panicked")?.context("writing progress")?;

    result.with_context(|| format!("bootstrapping builder {}", builder.name))?;
    println!("{} Builder {} is running", "✓".green(), builder.name.bold());
    Ok(())
}
