use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use offline_worker::cache::{CacheLayer, SqliteStorage};
use offline_worker::net::HttpNetwork;
use offline_worker::{commands, config, logging};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline caching worker for a static tutorial site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Site origin to scope the worker to
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let store_path = config.store_path()?;
  let log_dir = store_path
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let _log_guard = logging::init(&log_dir)?;

  let caches = CacheLayer::new(SqliteStorage::open(&store_path)?);
  let network = Arc::new(HttpNetwork::new()?);

  commands::run(args.command, &config, caches, network).await
}
