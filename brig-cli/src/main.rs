use anyhow::{Context, Result};
use brig_core::Config;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "brig")]
#[command(about = "Manage BuildKit builders running in Docker containers", long_about = None)]
struct Cli {
    /// Builder name (defaults to the configured default builder)
    #[arg(short, long, global = true, env = "BRIG_BUILDER")]
    name: Option<String>,

    /// Driver option (KEY=VALUE), overrides the configuration file
    #[arg(long = "driver-opt", global = true)]
    driver_opt: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start the builder container, waiting until BuildKit is ready
    Bootstrap,

    /// Show the builder and the state of its container
    Inspect,

    /// Stop the builder container
    Stop,

    /// Remove the builder container
    Rm {
        /// Keep the state volume (build cache)
        #[arg(long)]
        keep_state: bool,

        /// Remove even if running
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("loading configuration")?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    brig_core::init_observability(&level)
        .map_err(|e| anyhow::anyhow!("initializing logging: {}", e))?;

    let builder = commands::Builder::new(&config, cli.name, &cli.driver_opt)?;

    match cli.command {
        Commands::Bootstrap => commands::bootstrap(&builder).await?,
        Commands::Inspect => commands::inspect(&builder).await?,
        Commands::Stop => commands::stop(&builder).await?,
        Commands::Rm { keep_state, force } => commands::rm(&builder, force, !keep_state).await?,
    }

    Ok(())
}
