#[macro_use]
extern crate tracing;

use apployd_engine::config::Config;
use clap::Parser;
use logger::LogConfig;

/// Apployd deployment-orchestrator worker.
#[derive(Debug, Parser)]
#[command(name = "apployd-engine", version)]
struct Cli {
  /// Load and validate configuration, then exit without starting any
  /// background loop.
  #[arg(long)]
  config_check: bool,

  /// Override `ENGINE_REGION` for this process.
  #[arg(long)]
  region: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  let mut config = Config::from_env()?;
  if let Some(region) = cli.region {
    config.engine_region = region;
  }

  logger::init(&LogConfig {
    level: config.log_level.parse().unwrap_or_default(),
    json: config.log_json,
    otlp_endpoint: config.log_otlp_endpoint.clone(),
    otlp_service_name: Some("apployd-engine".to_string()),
  })?;

  info!("apployd-engine version: v{}", env!("CARGO_PKG_VERSION"));
  info!(region = %config.engine_region, port = config.port, "starting engine");

  if cli.config_check {
    info!("configuration is valid");
    return Ok(());
  }

  apployd_engine::run(config).await
}
