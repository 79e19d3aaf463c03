use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use telemetry_hub::config::HubConfig;
use telemetry_hub::hub::HubHandle;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = setup_config().await?;
    info!(
        host = %config.broker.host,
        port = config.broker.port,
        topics = ?config.broker.topics,
        "Starting telemetry hub"
    );

    let hub = HubHandle::spawn(&config).map_err(|e| eyre!("Failed to spawn hub: {}", e))?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown signal received");

    hub.shutdown().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

// First argument overrides the default config location
async fn setup_config() -> Result<HubConfig> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => HubConfig::default_path()?,
    };

    HubConfig::ensure_default_config(&path).await?;
    HubConfig::load(&path).await
}
