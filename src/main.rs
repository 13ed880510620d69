/// opsizer: pipeline operator sizing tool
///
/// Main entry point. Parses the command line, sets up logging, runs every
/// operator of the pipeline once and reports recommended cores and memory.

use clap::Parser;
use opsizer::{app, cli::Cli, config::Config};
use std::process::ExitCode;
use tracing::Level;

/// Application entry point
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = Config::default();
    tracing::debug!("⚙️ Configuration: {:?}", config);

    match app::run(config, &cli.pipeline_path, cli.run_options()).await {
        Ok(report) => {
            if report.stopped_early {
                tracing::info!("Pipeline stopped before every operator ran");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
