//! WebRTC Signaling Relay - Entry Point
//!
//! Loads the configuration, connects the backplane, and accepts
//! WebSocket connections.

use std::env;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use signal_relay::{handle_connection, Backplane, Config, LocalBackplane, RedisBackplane, SignalServer};

/// Config file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=signal_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signal_relay=info")),
        )
        .init();

    let config = load_config(env::args().nth(1))?;

    let backplane: Arc<dyn Backplane> = match &config.redis {
        Some(redis) => Arc::new(RedisBackplane::connect(redis).await?),
        None => {
            info!("No redis configured, running single-instance");
            Arc::new(LocalBackplane::spawn())
        }
    };

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Signaling relay listening on {}", addr);

    let server = SignalServer::start(config, backplane);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let server = Arc::clone(&server);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, server).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Load the config file named on the command line, or the default one.
///
/// A missing default file falls back to built-in defaults; a missing
/// explicit file is an error.
fn load_config(path: Option<String>) -> Result<Config, signal_relay::ConfigError> {
    match path {
        Some(path) => Config::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH),
        None => {
            warn!("{} not found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Ok(Config::default())
        }
    }
}
