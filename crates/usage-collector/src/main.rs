use std::path::PathBuf;

use clap::Parser;
use usage_collector::{init_logging, Collector, Config};

#[derive(Parser, Debug, Clone)]
#[command(name = "usage-collector")]
#[command(about = "LLM usage telemetry and tiered database metric collector")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, env = "USAGE_COLLECTOR_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.log_level.is_some() {
        env_logger::init();
    } else {
        init_logging(cli.debug);
    }

    log::info!("Loading configuration from {}", cli.config.display());
    let config = Config::load(&cli.config)?;

    if cli.debug {
        log::debug!("Collector configuration:");
        log::debug!("  Poll interval: {}s", config.poll_interval);
        log::debug!("  Callback interval: {}s", config.callback_interval);
        log::debug!("  Custom intervals: {:?}", config.custom_poll_interval);
        log::debug!("  Metrics: {}", config.metrics.len());
    }

    let mut collector = Collector::build(&config)?;
    collector.start()?;

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested");
    collector.shutdown().await;
    Ok(())
}
