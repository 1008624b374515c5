use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_relay::{
    config::Config,
    proxy::Provider,
    services::{scheduler, RelayManager},
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "iptv-relay")]
#[command(version)]
#[command(about = "An IPTV playlist and EPG aggregation proxy with ffmpeg stream relaying")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("iptv_relay={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting iptv-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!("configuration loaded from: {}", cli.config.display());

    let rules = config.compile_filters()?;
    let refresh_interval = config.refresh_interval()?;

    let provider = Arc::new(Provider::new(&config, rules));
    let relay = Arc::new(RelayManager::new(&config.relay));

    if config.relay.enabled {
        let version = relay
            .check_availability()
            .await
            .context("ffmpeg is enabled but not available")?;
        info!(
            version = version.as_deref().unwrap_or("unknown"),
            "ffmpeg available"
        );
    }

    provider
        .refresh()
        .await
        .context("initial provider refresh failed")?;

    scheduler::spawn_refresh_loop(Arc::clone(&provider), refresh_interval);
    info!(interval = %config.refresh_interval, "scheduled refresh loop started");

    let state = AppState::new(Arc::new(config), provider, relay);
    let server = WebServer::new(state)?;
    info!(address = %server.addr(), "starting http server");
    server.serve().await?;

    info!("http server stopped");
    Ok(())
}
