//! Tradeflow - headless signal-to-order pipeline
//!
//! Runs the monitor and reconciler loops without any UI; observability is
//! structured logs on stdout. Suitable for server deployments.
//!
//! # Usage
//! ```sh
//! MONITOR_INTERVAL_SECS=30 cargo run
//! cargo run -- --once          # drive a single monitor cycle and exit
//! ```

use anyhow::Result;
use clap::Parser;
use tradeflow::application::system::Application;
use tradeflow::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tradeflow", about = "Signal-to-order trading pipeline")]
struct Args {
    /// Path to the strategy rules document (defaults to the built-in one).
    #[arg(long)]
    rules_file: Option<String>,

    /// Run exactly one monitor cycle, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradeflow {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if args.rules_file.is_some() {
        config.rules_file = args.rules_file;
    }
    info!(
        "Configuration loaded: db={}, monitor every {:?}, reconcile every {:?}",
        config.database_url, config.pipeline.monitor_interval, config.pipeline.reconcile_interval
    );

    let app = Application::build(config).await?;

    if args.once {
        info!("Running a single monitor cycle (--once).");
        app.monitor.run_cycle().await?;
        app.reconciler.run_cycle().await?;
        return Ok(());
    }

    let handle = app.start().await?;
    info!("Running. Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; stopping loops.");
    handle.shutdown();

    Ok(())
}
