//! Single-flight cache fills
//!
//! When many callers miss the same key at once, one of them takes the
//! fill lock and queries the backing store while the rest poll the cache
//! for its result. Waiters that outlast the wait bound fetch directly, so
//! a crashed winner costs latency but never availability.

use std::future::Future;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::domain::{DomainError, Resolved, ValueSource};
use crate::infrastructure::cache::ExpiringCache;
use crate::infrastructure::lock::DistributedLock;
use crate::infrastructure::metrics;

/// Timing for single-flight fills
#[derive(Debug, Clone)]
pub struct SingleFlightConfig {
    /// Fill lock lease; must comfortably exceed a backing fetch
    pub lease: Duration,
    /// How long losers poll before fetching on their own
    pub wait: Duration,
    pub poll_interval: Duration,
}

impl Default for SingleFlightConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(5),
            wait: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Suppresses duplicate backing fetches for the same key
#[derive(Debug, Clone)]
pub struct SingleFlightGuard {
    cache: ExpiringCache,
    lock: DistributedLock,
    config: SingleFlightConfig,
}

impl SingleFlightGuard {
    pub fn new(cache: ExpiringCache, lock: DistributedLock) -> Self {
        Self::with_config(cache, lock, SingleFlightConfig::default())
    }

    pub fn with_config(
        cache: ExpiringCache,
        lock: DistributedLock,
        config: SingleFlightConfig,
    ) -> Self {
        Self {
            cache,
            lock,
            config,
        }
    }

    pub fn cache(&self) -> &ExpiringCache {
        &self.cache
    }

    pub fn config(&self) -> &SingleFlightConfig {
        &self.config
    }

    /// Returns the cached value for `key`, filling it through `fetch` on a miss
    ///
    /// `fetch` returning `Ok(None)` is cached negatively. A fetch error is
    /// returned as-is and nothing is cached. Only an unreachable store lets
    /// the fill proceed without the lock; any other lock error is returned.
    pub async fn get_or_fetch<V, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        fetch: F,
    ) -> Result<Resolved<V>, DomainError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, DomainError>>,
    {
        if let Some(resolved) = self.cached(key).await {
            return Ok(resolved);
        }

        let resource = self.cache.keys().fill_resource(key);

        match self.lock.acquire(&resource, self.config.lease).await {
            Ok(Some(token)) => {
                // A previous winner may have filled the key since our miss
                if let Some(resolved) = self.cached(key).await {
                    self.lock.release(&resource, &token).await;
                    return Ok(resolved);
                }

                let fetched = fetch().await;
                if let Ok(value) = &fetched {
                    self.populate(key, ttl, tags, value).await;
                }
                self.lock.release(&resource, &token).await;

                metrics::record_backing_fetch(ValueSource::Backing);
                debug!(key = %key, "Filled cache under single-flight lock");
                Ok(Resolved::new(fetched?, ValueSource::Backing))
            }
            Ok(None) => {
                if let Some(resolved) = self.wait_for_fill(key).await {
                    return Ok(resolved);
                }

                warn!(
                    key = %key,
                    wait_ms = self.config.wait.as_millis() as u64,
                    "Single-flight wait exceeded, fetching directly"
                );
                let value = fetch().await?;
                self.populate(key, ttl, tags, &value).await;

                metrics::record_backing_fetch(ValueSource::Fallback);
                Ok(Resolved::new(value, ValueSource::Fallback))
            }
            Err(e) if e.is_store_unavailable() => {
                warn!(key = %key, error = %e, "Fill lock unavailable, fetching without exclusivity");
                let value = fetch().await?;
                self.populate(key, ttl, tags, &value).await;

                metrics::record_backing_fetch(ValueSource::Backing);
                Ok(Resolved::new(value, ValueSource::Backing))
            }
            Err(e) => Err(e),
        }
    }

    async fn cached<V: DeserializeOwned>(&self, key: &str) -> Option<Resolved<V>> {
        self.cache
            .get::<V>(key)
            .await
            .map(|entry| entry.into_resolved())
    }

    async fn wait_for_fill<V: DeserializeOwned>(&self, key: &str) -> Option<Resolved<V>> {
        let deadline = Instant::now() + self.config.wait;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            sleep(self.config.poll_interval.min(deadline - now)).await;

            if let Some(resolved) = self.cached(key).await {
                return Some(resolved);
            }
        }
    }

    async fn populate<V: Serialize>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[String],
        value: &Option<V>,
    ) {
        match value {
            Some(value) => self.cache.set(key, value, ttl, tags).await,
            None => self.cache.set_negative(key, ttl, tags).await,
        };
    }
}
