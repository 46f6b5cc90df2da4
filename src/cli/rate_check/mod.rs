//! Rate check command - counts, inspects or resets a rate window

use clap::Args;

use crate::CoordinationContext;

/// Arguments for the rate-check command
#[derive(Args, Clone, Debug)]
pub struct RateCheckArgs {
    /// Actor to check, e.g. a client IP or user id
    pub actor: String,

    /// Report the current window without counting a request
    #[arg(long, conflicts_with = "reset")]
    pub status: bool,

    /// Clear the current window
    #[arg(long)]
    pub reset: bool,
}

/// Run a rate limit operation and print the outcome as JSON
pub async fn run(args: RateCheckArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let context = CoordinationContext::from_config(&config).await?;
    let limiter = &context.rate_limiter;

    if args.reset {
        let cleared = limiter.reset(&args.actor).await?;
        println!("{}", serde_json::json!({ "actor": args.actor, "reset": cleared }));
        return Ok(());
    }

    let decision = if args.status {
        limiter.status(&args.actor).await?
    } else {
        limiter.check(&args.actor).await
    };

    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(())
}
