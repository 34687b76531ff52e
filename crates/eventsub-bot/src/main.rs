//! EventSub session service entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// EventSub WebSocket session service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "EVENTSUB_CONFIG", default_value = "config/default.toml")]
    config: String,

    /// Override the default EventSub WebSocket endpoint
    #[arg(long)]
    ws_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made
    eventsub_ws::init_crypto();

    let args = Args::parse();

    let mut config = eventsub_bot::AppConfig::load(Some(args.config.as_str()))?;
    if let Some(url) = args.ws_url {
        config.websocket.url = url;
    }
    config.validate()?;

    eventsub_telemetry::init_logging(&config.telemetry.log_level)?;

    info!("Starting EventSub bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %args.config,
        url = %config.websocket.url,
        conduit = ?config.conduit.conduit_id,
        "Configuration loaded"
    );

    let app = eventsub_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
