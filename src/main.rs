mod bot;
mod config;
mod error;
mod llm;
mod platform;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Relay;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::platform::telegram::TelegramPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up secrets from .env without overriding the real environment
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tgrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Telegram API: {}", config.telegram.api_url);
    info!("  Provider: {}", config.llm.provider);
    info!("  Completion API: {}", config.llm.effective_base_url());
    info!("  Model: {}", config.llm.model);
    info!("  Offset commit: per {}", config.relay.commit);

    let platform =
        TelegramPlatform::new(&config.telegram).context("Failed to set up Telegram client")?;
    let llm = LlmClient::new(config.llm.clone()).context("Failed to set up completion client")?;
    info!("Relaying to model {}", llm.model());

    let mut relay = Relay::new(platform, llm, &config);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, stopping after the current iteration");
                signal.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    info!("Relay is starting...");
    relay.startup().await;
    relay.run(shutdown).await;

    info!("Relay stopped at offset {}", relay.offset());

    Ok(())
}
