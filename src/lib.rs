//! cachecoord
//!
//! Coordinates concurrent actors around a shared, expiring, key-addressed
//! store:
//! - Cache-aside reads with jittered TTLs, negative caching and tags
//! - Single-flight cache fills over a distributed lock
//! - Event-based invalidation with an optional in-process tier
//! - Fixed-window rate limiting

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use domain::{
    BackingStore, CachePolicy, DomainError, KeySpace, KeyValueStore, RateLimitPolicy, TtlJitter,
};
use infrastructure::{
    cache::{ExpiringCache, ExpiringCacheConfig, LocalTier, LocalTierConfig},
    events::InvalidationListener,
    lock::DistributedLock,
    rate_limit::FixedWindowRateLimiter,
    services::{CoordinationService, ExclusiveWriteConfig},
    single_flight::{SingleFlightConfig, SingleFlightGuard},
    store::{StoreConfig, StoreFactory, StoreType},
};
use tracing::info;

/// Every coordination component, wired to one store
///
/// Built explicitly from configuration; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct CoordinationContext {
    pub store: Arc<dyn KeyValueStore>,
    pub cache: ExpiringCache,
    pub lock: DistributedLock,
    pub single_flight: SingleFlightGuard,
    pub rate_limiter: FixedWindowRateLimiter,
    config: AppConfig,
}

impl CoordinationContext {
    /// Connects to the configured store and builds every component
    pub async fn from_config(config: &AppConfig) -> Result<Self, DomainError> {
        config.validate()?;

        let store_config = store_config(config)?;
        info!(backend = %store_config.store_type, "Creating coordination store");

        let store = StoreFactory::new().create(&store_config).await?;

        Self::with_store(store, config)
    }

    /// Builds every component on an existing store
    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        config: &AppConfig,
    ) -> Result<Self, DomainError> {
        config.validate()?;

        let keys = KeySpace::new().with_rate_prefix(config.rate_limit.key_prefix.clone());

        let cache_config = ExpiringCacheConfig::default()
            .with_jitter(TtlJitter::new(config.cache.jitter_fraction)?)
            .with_negative_ttl_divisor(config.cache.negative_ttl_divisor)
            .with_tag_safety_margin(config.cache.tag_safety_margin());

        let mut cache =
            ExpiringCache::with_config(store.clone(), cache_config).with_key_space(keys.clone());

        if config.cache.local_tier.enabled {
            cache = cache.with_local_tier(LocalTier::new(LocalTierConfig {
                max_capacity: config.cache.local_tier.max_capacity,
                ttl: Duration::from_secs(config.cache.local_tier.ttl_secs),
            }));
        }

        let lock = DistributedLock::new(store.clone())
            .with_key_space(keys.clone())
            .with_poll_interval(config.lock.poll_interval());

        let single_flight = SingleFlightGuard::with_config(
            cache.clone(),
            lock.clone(),
            SingleFlightConfig {
                lease: config.single_flight.lease(),
                wait: config.single_flight.wait(),
                poll_interval: config.single_flight.poll_interval(),
            },
        );

        let policy = RateLimitPolicy::new(config.rate_limit.limit, config.rate_limit.window())?;
        let rate_limiter = FixedWindowRateLimiter::new(store.clone(), policy).with_key_space(keys);

        Ok(Self {
            store,
            cache,
            lock,
            single_flight,
            rate_limiter,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cache policy built from the `cache` and `events` sections
    pub fn default_policy(&self) -> CachePolicy {
        let mut policy = CachePolicy::new(self.config.cache.default_ttl())
            .with_event_channel(self.config.events.channel.clone());

        if let Some(threshold) = self.config.cache.stale_threshold() {
            policy = policy.with_stale_threshold(threshold);
        }

        policy
    }

    /// Coordinated reads and writes over `backing`
    pub fn service<B: BackingStore>(
        &self,
        backing: Arc<B>,
        policy: CachePolicy,
    ) -> CoordinationService<B> {
        CoordinationService::new(
            backing,
            self.single_flight.clone(),
            self.lock.clone(),
            policy,
        )
        .with_exclusive_config(ExclusiveWriteConfig {
            lease: self.config.lock.lease(),
            max_wait: self.config.lock.max_wait(),
        })
    }

    /// Listener applying events from the configured channel to this cache
    pub fn listener(&self) -> InvalidationListener {
        InvalidationListener::new(self.cache.clone(), self.config.events.channel.clone())
    }
}

fn store_config(config: &AppConfig) -> Result<StoreConfig, DomainError> {
    let store_type: StoreType = config.store.backend.parse()?;

    let mut store_config = match store_type {
        StoreType::InMemory => StoreConfig::in_memory(),
        StoreType::Redis => StoreConfig::redis(config.store.redis_url.clone().unwrap_or_default()),
    };
    store_config.connection_timeout = Duration::from_millis(config.store.connection_timeout_ms);

    if let Some(prefix) = &config.store.key_prefix {
        store_config = store_config.with_key_prefix(prefix.clone());
    }

    Ok(store_config)
}
