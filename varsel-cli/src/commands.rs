use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use varsel_config::VarselConfig;
use varsel_engine::{run_address_worker, run_rule_worker};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Match event addresses against the indicator list
    Ip(IpArgs),
    /// Match events against the compiled rule file
    Rules(RuleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IpArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Indicator list path, one IPv4 address per line (overrides config)
    #[arg(short, long)]
    pub indicators: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RuleArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Rule file path (overrides config)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Configuration file; defaults to config/varsel.yaml when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Metrics surface port (overrides config)
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

fn load_config(common: &CommonArgs) -> Result<VarselConfig, varsel_config::ConfigError> {
    let mut config = match &common.config {
        Some(path) => VarselConfig::load_from_path(path)?,
        None => VarselConfig::load()?,
    };
    if let Some(port) = common.metrics_port {
        config.telemetry.metrics_port = port;
    }
    Ok(config)
}

pub async fn run_ip_mode(args: IpArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = load_config(&args.common)?;
    if let Some(path) = args.indicators {
        config.indicators.file = path;
    }

    info!(indicators = %config.indicators.file.display(), "starting address worker");
    let summary = run_address_worker(config).await?;
    info!(messages = summary.messages, alarms = summary.alarms, "address worker done");
    Ok(())
}

pub async fn run_rules_mode(args: RuleArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = load_config(&args.common)?;
    if let Some(path) = args.rules {
        config.rules.file = path;
    }

    info!(rules = %config.rules.file.display(), "starting rule worker");
    let summary = run_rule_worker(config).await?;
    info!(messages = summary.messages, alarms = summary.alarms, "rule worker done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ip_subcommand_with_overrides() {
        let cli = Cli::parse_from([
            "varsel",
            "ip",
            "--indicators",
            "/tmp/list.txt",
            "--metrics-port",
            "9999",
        ]);
        match cli.command {
            Commands::Ip(args) => {
                assert_eq!(args.indicators, Some(PathBuf::from("/tmp/list.txt")));
                assert_eq!(args.common.metrics_port, Some(9999));
                assert!(args.common.config.is_none());
            }
            _ => panic!("expected ip subcommand"),
        }
    }

    #[test]
    fn parses_rules_subcommand() {
        let cli = Cli::parse_from(["varsel", "rules", "--rules", "rules.yaml"]);
        match cli.command {
            Commands::Rules(args) => {
                assert_eq!(args.rules, Some(PathBuf::from("rules.yaml")));
            }
            _ => panic!("expected rules subcommand"),
        }
    }
}
