//! # Configuration Checker
//!
//! Loads the layered configuration, prints it with credentials masked and
//! reports which cache backend it selects.

use anyhow::Context;
use clap::Parser;
use resilient_cache::cache::{CacheManager, ConnectionStatus};
use resilient_cache::config::load_config;
use resilient_cache::logging::init_structured_logging;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "check_config")]
#[command(about = "Validate resilient-cache configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML file to load (default: ./resilient-cache.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wait for the durable cache connection attempt and fail if it does not connect
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    println!("{}", serde_json::to_string_pretty(&config.sanitized())?);

    let cache = CacheManager::new(config);
    cache.warmup();
    info!(provider = cache.provider_name(), "Cache backend selected");

    if cli.probe {
        match cache.wait_for_durable().await {
            Some(ConnectionStatus::Connected) => info!("Durable cache reachable"),
            Some(status) => {
                error!(status = %status, "Durable cache not reachable");
                process::exit(1);
            }
            None => info!("Memory-only mode, nothing to probe"),
        }
    }

    Ok(())
}
