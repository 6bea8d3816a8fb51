//! Observability infrastructure: tracing and metrics.
//!
//! Metrics go through the `metrics` facade; without an installed recorder
//! they are no-ops, so embedders choose their own exporter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize logging and describe the brig metrics.
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this more than
/// once returns an error.
pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    metrics::register_core_metrics();
    tracing::debug!("Observability initialized");
    Ok(())
}
