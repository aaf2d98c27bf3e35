//! Tidepool CLI - Command-line interface
//!
//! Runs either the swarm tracker or a single peer until interrupted.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tidepool_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Tracker-coordinated peer-to-peer file distribution")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for full trace logs
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(
        cli.log_level.as_tracing_level(),
        cli.logs_dir.as_deref(),
        &cli.command.run_name(),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    commands::handle_command(cli.command).await
}
