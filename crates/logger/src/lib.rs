//! OBD-II Logger
//!
//! Wires configuration, logging and the diagnostic link into a poll loop
//! that appends one JSON record per cycle to the log file.

pub mod config;

pub use crate::config::{AppConfig, CatalogMode, LogFormat};

use anyhow::Context;
use obd_poller::{PollLoop, PollerConfig, RunSummary};
use obd_protocol::{ObdClient, ObdError};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging; `RUST_LOG` overrides the default `info` filter
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init()?,
    }
    Ok(())
}

/// Connect to the vehicle (or the simulator) and poll until `shutdown` is raised
pub async fn run(config: &AppConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<RunSummary> {
    let registry = config.registry().context("invalid manufacturer command")?;
    let catalog = config
        .catalog_source(&registry)
        .context("invalid catalog configuration")?;
    let options = config
        .connect_options()
        .context("invalid adapter configuration")?;

    let mut poller = PollLoop::new(PollerConfig {
        interval: config.poll_interval(),
        catalog,
        log_path: config.log_path(),
        sync_data: config.sync_data,
    });

    let summary = if config.simulate {
        info!("Using simulated vehicle");
        poller
            .run(
                move || async move { Ok::<_, ObdError>(ObdClient::simulated(registry)) },
                shutdown,
            )
            .await?
    } else {
        info!(
            "Connecting to adapter on {} at {} baud",
            options.port.as_deref().unwrap_or("first available port"),
            options.baud_rate
        );
        poller
            .run(move || ObdClient::connect(options, registry), shutdown)
            .await?
    };

    Ok(summary)
}
