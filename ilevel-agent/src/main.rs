//! iLevel Agent - background poller for Poem iLevel oil tank sensors
//!
//! - Logs in to the iLevel dashboard and fetches the tank list
//! - Filters out single-sample level glitches
//! - Publishes tanks to the local MQTT inventory
//! - Retries every 10 minutes on network trouble, refreshes every 30

use anyhow::{Context, Result};
use ilevel_agent::config::AgentConfig;
use ilevel_agent::inventory::MqttInventory;
use ilevel_agent::{Poller, SessionManager, TankRegistry, TokioScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ilevel_agent=info")),
        )
        .init();

    info!("🛢️ iLevel Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    info!("Agent {} (config v{})", config.agent.agent_id, config.agent.version);
    let credentials = config.credentials()?;

    let sessions = SessionManager::new(credentials, &config.ilevel.base_url, config.request_timeout())
        .context("Failed to set up iLevel session")?;

    let (inventory, triggers) = MqttInventory::connect(&config);
    info!(
        "Publishing tanks on {} (broker {}:{})",
        inventory.topics().state,
        config.mqtt.broker_host,
        config.mqtt.broker_port
    );

    let poller = Poller::new(
        sessions,
        TankRegistry::new(inventory),
        TokioScheduler::new(),
        config.poll_settings(),
    );

    tokio::select! {
        _ = poller.run(triggers) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
