//! Invalidate command - drops cached entries by key, tag or pattern

use clap::{ArgGroup, Args};
use tracing::info;

use crate::CoordinationContext;
use crate::domain::InvalidationAction;

/// Arguments for the invalidate command
#[derive(Args, Clone, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["key", "tag", "pattern"])))]
pub struct InvalidateArgs {
    /// Exact cache key
    #[arg(long)]
    pub key: Option<String>,

    /// Tag whose members should be dropped
    #[arg(long)]
    pub tag: Option<String>,

    /// Glob pattern such as `post:*`
    #[arg(long)]
    pub pattern: Option<String>,

    /// Also announce the key on the invalidation channel
    #[arg(long, requires = "key")]
    pub publish: bool,
}

/// Run an invalidation and print how many entries were removed
pub async fn run(args: InvalidateArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let context = CoordinationContext::from_config(&config).await?;
    let cache = &context.cache;

    let removed = if let Some(key) = &args.key {
        let removed = usize::from(cache.invalidate(key).await);

        if args.publish {
            let receivers = cache
                .publish_invalidation(&config.events.channel, key, InvalidationAction::Invalidate)
                .await;
            info!(key = %key, receivers, "Published invalidation");
        }

        removed
    } else if let Some(tag) = &args.tag {
        cache.invalidate_by_tag(tag).await
    } else if let Some(pattern) = &args.pattern {
        cache.invalidate_pattern(pattern).await
    } else {
        0
    };

    println!("{}", serde_json::json!({ "removed": removed }));

    Ok(())
}
