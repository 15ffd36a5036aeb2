mod cli;
mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use accel_core::AccelConfig;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = AccelConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    config.log_summary();

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.summary())?);
        }
        Command::Run(run) => {
            let report = workload::run(&config, &run).await?;
            info!(
                completed = report.scheduler.completed,
                failed = report.scheduler.failed,
                recoveries = report.recovery.len(),
                "workload finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
