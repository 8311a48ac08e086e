mod cli;
mod commands;
mod heartbeat;
mod report;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use offload_dispatch::DispatchConfig;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Run { workload, json } => commands::run::execute(config, workload, json).await,
        Command::Compare {
            workload,
            heartbeat_ms,
            json,
        } => commands::compare::execute(config, workload, heartbeat_ms, json).await,
    }
}

/// File config with env overrides, then command-line overrides on top.
fn load_config(args: &CliArgs) -> Result<DispatchConfig> {
    let mut config = if args.config.exists() {
        let config = DispatchConfig::from_file(&args.config)?;
        info!(path = %args.config.display(), "loaded config");
        config
    } else {
        warn!(path = %args.config.display(), "config file not found, using defaults");
        let mut config = DispatchConfig::default();
        config.apply_env_overrides();
        config
    };

    if let Some(capacity) = args.capacity {
        config.pool.capacity = capacity;
    }
    if let Some(ms) = args.timeout_ms {
        config = config.with_job_timeout((ms > 0).then(|| Duration::from_millis(ms)));
    }
    config.validate()?;
    Ok(config)
}
