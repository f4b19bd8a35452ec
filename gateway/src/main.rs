use anyhow::Context;
use tracing::info;

use gateway::{build_provider, GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let config = GatewayConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Both ring and aws-lc may be linked in; pick one for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        http_port = config.http_port,
        "Starting TTS gateway..."
    );
    info!("Gateway configuration loaded: {:?}", config);

    let provider = build_provider(&config).context("Failed to create synthesis provider")?;
    GatewayServer::new(config, provider)
        .run()
        .await
        .context("Gateway failed")?;

    info!("Gateway shutdown complete");
    Ok(())
}
