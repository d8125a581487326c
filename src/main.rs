mod cache;
mod config;
mod frontend;
mod gva;
mod logging;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mass-shootings-count")]
#[command(about = "Serves the number of days since the last mass shooting in the US")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mass-shootings-count/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on, e.g. 0.0.0.0:8080
  #[arg(short, long)]
  listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override listen address if specified on command line
  let config = if let Some(listen) = args.listen {
    config::Config { listen, ..config }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  let scraper = gva::Scraper::new(&config.scraper)?;
  let tz = config.tz()?;
  let render_data = Arc::new(frontend::watch_render_data(
    scraper,
    tz,
    config.watch_options(),
  ));

  // Fill the cache before accepting requests so the first ones don't block.
  info!("Preloading data");
  if let Err(e) = render_data.preload().await {
    warn!(error = %e, "Preload failed, requests will retry");
  }

  let app = frontend::router(render_data);

  let listener = tokio::net::TcpListener::bind(config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  info!(addr = %config.listen, "Listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("Shutdown signal received");
    })
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}
