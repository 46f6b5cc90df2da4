//! Ping command - checks store connectivity

use tracing::info;

use crate::CoordinationContext;

/// Ping the configured store
pub async fn run() -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let context = CoordinationContext::from_config(&config).await?;

    context.store.ping().await?;
    info!(backend = %config.store.backend, "Store reachable");
    println!("PONG");

    Ok(())
}
