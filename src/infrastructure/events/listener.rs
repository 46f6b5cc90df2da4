//! Cross-process invalidation listener

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{DomainError, InvalidationEvent};
use crate::infrastructure::cache::ExpiringCache;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Applies invalidation events published by other processes
///
/// ```text
/// process A: write -> invalidate("post:1") -> PUBLISH cache:invalidate {"key":"post:1",...}
/// process B: listener receives the event  -> invalidate("post:1") locally and shared
/// ```
///
/// Delivery is at-most-once. Events sent while a listener is reconnecting
/// are lost and the TTL bounds how long a missed one stays visible.
#[derive(Debug, Clone)]
pub struct InvalidationListener {
    cache: ExpiringCache,
    channel: String,
}

impl InvalidationListener {
    pub fn new(cache: ExpiringCache, channel: impl Into<String>) -> Self {
        Self {
            cache,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Runs the listener in the background, reconnecting with backoff
    ///
    /// Aborting the returned handle stops it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                match self.run().await {
                    Ok(handled) => {
                        if handled > 0 {
                            backoff = INITIAL_BACKOFF;
                        }
                        warn!(
                            channel = %self.channel,
                            handled,
                            backoff_secs = backoff.as_secs(),
                            "Invalidation subscription closed, resubscribing"
                        );
                    }
                    Err(e) => {
                        error!(
                            channel = %self.channel,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Invalidation listener error, reconnecting"
                        );
                    }
                }

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
    }

    /// Subscribes and applies events until the subscription ends
    ///
    /// Returns how many events were applied.
    pub async fn run(&self) -> Result<usize, DomainError> {
        let mut events = self.cache.store().subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to invalidation channel");

        let mut handled = 0;
        while let Some(payload) = events.next().await {
            if self.handle(&payload).await.is_some() {
                handled += 1;
            }
        }

        Ok(handled)
    }

    /// Applies a single raw payload
    ///
    /// Undecodable payloads are logged and skipped.
    pub async fn handle(&self, payload: &str) -> Option<InvalidationEvent> {
        let event = match InvalidationEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Skipping undecodable invalidation event");
                return None;
            }
        };

        self.cache.invalidate(&event.key).await;
        debug!(key = %event.key, action = %event.action, "Applied invalidation event");

        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::{InvalidationAction, KeyValueStore};
    use crate::infrastructure::cache::{LocalTier, LocalTierConfig};
    use crate::infrastructure::store::InMemoryStore;

    fn local_cache(store: Arc<InMemoryStore>) -> ExpiringCache {
        ExpiringCache::new(store).with_local_tier(LocalTier::new(LocalTierConfig {
            max_capacity: 10,
            ttl: Duration::from_secs(30),
        }))
    }

    #[tokio::test]
    async fn test_handle_evicts_key() {
        let store = Arc::new(InMemoryStore::new());
        let cache = local_cache(store.clone());
        let listener = InvalidationListener::new(cache.clone(), "cache:invalidate");

        cache.set("post:1", &"hello", Duration::from_secs(60), &[]).await;

        let payload = InvalidationEvent::new("post:1", InvalidationAction::Delete)
            .to_payload()
            .unwrap();
        let event = listener.handle(&payload).await.unwrap();

        assert_eq!(event.key, "post:1");
        assert!(!cache.contains("post:1").await);
    }

    #[tokio::test]
    async fn test_handle_skips_garbage() {
        let store = Arc::new(InMemoryStore::new());
        let listener = InvalidationListener::new(local_cache(store), "cache:invalidate");

        assert!(listener.handle("not json").await.is_none());
    }

    #[tokio::test]
    async fn test_published_event_removes_local_entry() {
        let store = Arc::new(InMemoryStore::new());
        let subscriber_cache = local_cache(store.clone());
        let publisher_cache = ExpiringCache::new(store.clone());

        subscriber_cache
            .set("post:1", &"v1", Duration::from_secs(60), &[])
            .await;

        let handle = InvalidationListener::new(subscriber_cache.clone(), "cache:invalidate").spawn();

        // Wait for the subscription to be in place
        let mut receivers = 0;
        for _ in 0..50 {
            receivers = publisher_cache
                .publish_invalidation("cache:invalidate", "post:1", InvalidationAction::Update)
                .await;
            if receivers > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(receivers, 1);

        let mut evicted = false;
        for _ in 0..50 {
            if subscriber_cache.get::<String>("post:1").await.is_none() {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.abort();
        assert!(evicted);
        assert!(store.get("post:1").await.unwrap().is_none());
    }
}
