use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub mod aws;
pub mod config;
pub mod provider;
pub mod readiness;
pub mod sequencer;

#[cfg(test)]
mod testing;

#[derive(Parser, Debug)]
#[command(name = "tier-deploy", version)]
#[command(about = "Provision the broker, worker, queue, web and storage tiers on AWS")]
struct Cli {
    /// Configuration document (`.toml` or `.yaml`)
    #[arg(short, long, env = "TIER_DEPLOY_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match sequencer::deploy(&cli.config, aws::AwsProvider::connect).await {
        Ok(ledger) => {
            for resource in ledger.resources() {
                info!("  {}", resource);
            }
            info!(count = ledger.len(), "Deployment complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
