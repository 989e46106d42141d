//! gateway-rs: Gemini-to-web gateway
//!
//! Serves Gemini clients and fetches the content they ask for over
//! HTTP(S), converting HTML, feeds, and images to Gemini-native forms.

use gateway_rs::{GatewayConfig, GatewayServer};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting gateway-rs v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        GatewayConfig::from_file(Path::new(&config_path))?
    } else {
        info!("No config file specified, using development defaults");
        GatewayConfig::development()
    };

    let server = GatewayServer::new(config)?;
    server.run().await?;

    Ok(())
}
