use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use voice_relay::{build_router, AppState, ServerConfig, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice relay server...");

    let config = ServerConfig::from_env();
    let services = Services::from_env()?;
    info!(
        "Server configuration loaded: port={}, mode={}, relay={}, rate_limit={}/min, llm_timeout={}s",
        config.port,
        config.delivery_mode,
        config.relay.url,
        config.rate_limit_per_minute,
        config.llm_timeout_secs
    );

    let app = build_router(AppState::new(services, config.clone()))?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
