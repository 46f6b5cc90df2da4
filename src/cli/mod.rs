//! CLI module for cachecoord
//!
//! Operational subcommands against the configured coordination store:
//! - `listen`: apply invalidation events to this process until interrupted
//! - `ping`: check store connectivity
//! - `rate-check`: count, inspect or reset an actor's rate window
//! - `invalidate`: drop keys by name, tag or pattern

pub mod invalidate;
pub mod listen;
pub mod ping;
pub mod rate_check;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging::init_logging;

/// cachecoord - Distributed cache coordination
#[derive(Parser)]
#[command(name = "cachecoord")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Listen for invalidation events
    Listen,

    /// Check connectivity to the coordination store
    Ping,

    /// Run a rate limit check for an actor
    RateCheck(rate_check::RateCheckArgs),

    /// Invalidate cached entries
    Invalidate(invalidate::InvalidateArgs),
}

/// Loads `.env` and configuration, then installs logging
pub(crate) fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    Ok(config)
}
