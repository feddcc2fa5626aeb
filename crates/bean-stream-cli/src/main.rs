//! bean-stream CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use bean_stream_cli::{AppConfig, Cli, CommandDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = load_configuration(&cli)?.with_device(cli.device.clone());

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
///
/// Logs go to stderr; stdout carries the readings.
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
            .with_context(|| format!("failed to load configuration from {}", config_path))
    } else {
        Ok(AppConfig::default())
    }
}
