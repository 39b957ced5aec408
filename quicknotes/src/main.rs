// QuickNotes - headless note lifecycle and Azure DevOps sync engine
// Entry point and application setup

use anyhow::Context;
use quicknotes::app::AppState;
use quicknotes::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quicknotes=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting QuickNotes");

    let config = AppConfig::from_env();
    let state = AppState::initialize(config)
        .await
        .context("failed to initialize application")?;

    let tasks = state.start_background_tasks();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    state.shutdown(tasks).await;
    Ok(())
}
