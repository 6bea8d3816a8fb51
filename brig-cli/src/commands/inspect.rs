//! `brig inspect` command

use super::Builder;
use anyhow::{Context, Result};
use brig_core::{Driver, DriverStatus};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct BuilderRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DRIVER")]
    driver: String,
    #[tabled(rename = "CONTAINER")]
    container: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

/// Show the builder and its container state
pub async fn inspect(builder: &Builder) -> Result<()> {
    let driver = &builder.driver;
    let status = driver.status().await.context("querying container state")?;

    let row = BuilderRow {
        name: builder.name.clone(),
        driver: driver.factory_name().to_string(),
        container: driver.container_name(),
        image: driver.image().to_string(),
        status: paint(status),
    };

    let mut table = Table::new(vec![row]);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}

fn paint(status: DriverStatus) -> String {
    let text = status.to_string();
    match status {
        DriverStatus::Running => text.green().to_string(),
        DriverStatus::Stopped | DriverStatus::Created => text.yellow().to_string(),
        DriverStatus::Inactive => text.dimmed().to_string(),
    }
}
