//! vigil: real-time market-quality surveillance pipeline.
//!
//! Ingests order-book and ticker data from multiple venues, computes
//! microstructure metrics with decimal precision, detects statistically
//! significant anomalies, and projects state into the hot and cold stores.
//!
//! Exit codes: 0 clean shutdown, 1 invalid configuration, 2 fatal
//! dependency unavailable at startup, 3 unrecoverable I/O.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_common::Config;
use vigil_pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Market-quality surveillance pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/vigil.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Restrict the run to these venues (comma-separated, e.g.
    /// "binance,okx"). Pair metrics spanning a deselected venue are
    /// dropped.
    #[arg(long, value_delimiter = ',')]
    venues: Option<Vec<String>>,
}

fn init_tracing(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // Tracing may not be configured yet; stderr is the contract.
            eprintln!("vigil: invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    if let Some(venues) = &cli.venues {
        if let Err(e) = config.apply_venue_override(venues) {
            eprintln!("vigil: invalid configuration: {e}");
            return ExitCode::from(1);
        }
    }

    let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_tracing(&log_level);

    info!(
        venues = config.venues.len(),
        instruments = config.instruments.len(),
        alert_definitions = config.alerts.definitions.len(),
        "Starting vigil"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    // SIGINT/SIGTERM fan out to every stage for a graceful drain.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = signal_tx.send(());
        }
    });

    match Pipeline::new(config).run(shutdown_tx).await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            ExitCode::from(e.exit_code())
        }
    }
}
