//! OBD-II Logger - Main Entry Point

use anyhow::Context;
use obd_logger::{init_logging, run, AppConfig, CatalogMode};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

struct Args {
    config_path: Option<PathBuf>,
    simulate: bool,
    catalog_mode: Option<CatalogMode>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path: Option<PathBuf> = None;
    let mut simulate = false;
    let mut catalog_mode: Option<CatalogMode> = None;

    for arg in &args {
        match arg.as_str() {
            "--simulate" | "-s" => simulate = true,
            "--discover" => catalog_mode = Some(CatalogMode::Discovered),
            "--fixed" => catalog_mode = Some(CatalogMode::Fixed),
            "--help" | "-h" => {
                eprintln!(
                    r#"obd-logger - Poll an OBD-II adapter and append readings as JSON Lines

Usage: obd-logger [CONFIG] [OPTIONS]

Arguments:
  [CONFIG]         TOML config file (optional)

Options:
  -s, --simulate   Poll the built-in simulated vehicle
      --discover   Poll every command the vehicle reports as supported
      --fixed      Poll the configured watch list only
  -h, --help       Print this help message

Environment:
  OBD_LOGGER__<KEY>   Override a config key, e.g. OBD_LOGGER__ADAPTER__PORT
  RUST_LOG            Log filter (default: info)
"#
                );
                std::process::exit(0);
            }
            other if other.starts_with('-') => anyhow::bail!("Unknown argument: {}", other),
            path => {
                if config_path.is_some() {
                    anyhow::bail!("Unexpected argument: {}", path);
                }
                config_path = Some(PathBuf::from(path));
            }
        }
    }

    Ok(Args {
        config_path,
        simulate,
        catalog_mode,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    let mut config =
        AppConfig::load(args.config_path.as_deref()).context("failed to load configuration")?;
    if args.simulate {
        config.simulate = true;
    }
    if let Some(mode) = args.catalog_mode {
        config.catalog.mode = mode;
    }

    init_logging(config.logging.format).context("failed to initialize logging")?;
    info!("=== OBD-II Logger v{} ===", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = run(&config, shutdown_rx).await?;

    info!("Stopped logging.");
    info!(
        cycles = summary.cycles,
        records = summary.records_written,
        failures = summary.query_failures,
        empty = summary.empty_responses,
        "Run summary"
    );
    Ok(())
}
