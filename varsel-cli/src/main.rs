//! ## varsel-cli
//! **Worker entrypoint**
//! Starts an address worker or a rule worker over the configured event
//! stream, with the metrics surface alongside.

use clap::Parser;
use varsel_telemetry::logging::EventLogger;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    EventLogger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ip(args) => commands::run_ip_mode(args).await,
        Commands::Rules(args) => commands::run_rules_mode(args).await,
    }
}
