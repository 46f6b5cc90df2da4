//! Cache-aside coordination service

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{
    BackingStore, CachePolicy, DomainError, Freshness, InvalidationAction, InvalidationTargets,
    Resolved, ValueSource,
};
use crate::infrastructure::cache::ExpiringCache;
use crate::infrastructure::lock::DistributedLock;
use crate::infrastructure::single_flight::SingleFlightGuard;

/// Lease and wait bound for exclusive writes
#[derive(Debug, Clone)]
pub struct ExclusiveWriteConfig {
    pub lease: Duration,
    pub max_wait: Duration,
}

impl Default for ExclusiveWriteConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Outcome of pre-populating a set of keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Fetched and cached
    pub warmed: usize,
    /// Already cached
    pub skipped: usize,
    /// Not in the backing store, cached negatively
    pub missing: usize,
    /// Backing store errors
    pub failed: usize,
}

/// Read and write paths over one backing store
///
/// Reads go cache, then single-flight fill, then backing store. Writes
/// go to the backing store first and then invalidate; the cache is never
/// written on the write path.
pub struct CoordinationService<B: BackingStore> {
    backing: Arc<B>,
    cache: ExpiringCache,
    guard: SingleFlightGuard,
    lock: DistributedLock,
    policy: CachePolicy,
    exclusive: ExclusiveWriteConfig,
}

impl<B: BackingStore> Clone for CoordinationService<B> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            cache: self.cache.clone(),
            guard: self.guard.clone(),
            lock: self.lock.clone(),
            policy: self.policy.clone(),
            exclusive: self.exclusive.clone(),
        }
    }
}

impl<B: BackingStore> fmt::Debug for CoordinationService<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinationService")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

impl<B: BackingStore> CoordinationService<B> {
    pub fn new(
        backing: Arc<B>,
        guard: SingleFlightGuard,
        lock: DistributedLock,
        policy: CachePolicy,
    ) -> Self {
        Self {
            backing,
            cache: guard.cache().clone(),
            guard,
            lock,
            policy,
            exclusive: ExclusiveWriteConfig::default(),
        }
    }

    pub fn with_exclusive_config(mut self, exclusive: ExclusiveWriteConfig) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn cache(&self) -> &ExpiringCache {
        &self.cache
    }

    /// Reads `key` through the cache
    ///
    /// With a stale threshold configured, a hit close to expiry is served
    /// as-is while one background task refreshes it.
    pub async fn get(&self, key: &str) -> Result<Resolved<B::Value>, DomainError> {
        if let Some(threshold) = self.policy.stale_threshold
            && let Some((entry, freshness)) = self
                .cache
                .get_with_staleness::<B::Value>(key, threshold)
                .await
        {
            let resolved = entry.into_resolved();

            if freshness == Freshness::Stale {
                self.spawn_refresh(key);
                return Ok(Resolved::new(resolved.value, ValueSource::Stale));
            }

            return Ok(resolved);
        }

        let backing = self.backing.clone();
        let owned_key = key.to_string();

        self.guard
            .get_or_fetch(key, self.policy.ttl, &self.policy.tags, || async move {
                backing.fetch(&owned_key).await
            })
            .await
    }

    /// Writes to the backing store, then invalidates `targets`
    pub async fn write(
        &self,
        entity: B::Entity,
        targets: &InvalidationTargets,
    ) -> Result<B::Value, DomainError> {
        let value = self.backing.write(entity).await?;
        self.apply_invalidation(targets).await;

        Ok(value)
    }

    /// Like [`Self::write`], with the backing write serialized on `resource`
    ///
    /// Fails with [`DomainError::Busy`] when the lock cannot be taken within
    /// the configured wait.
    pub async fn write_exclusive(
        &self,
        resource: &str,
        entity: B::Entity,
        targets: &InvalidationTargets,
    ) -> Result<B::Value, DomainError> {
        let backing = self.backing.clone();

        let value = self
            .lock
            .with_lock(
                resource,
                self.exclusive.lease,
                self.exclusive.max_wait,
                || async move { backing.write(entity).await },
            )
            .await?;

        self.apply_invalidation(targets).await;

        Ok(value)
    }

    /// Drops `key` everywhere and tells other processes
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.cache.invalidate(key).await;
        self.announce(key, InvalidationAction::Invalidate).await;
        removed
    }

    /// Drops every entry under `tag` and tells other processes about each
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let (members, removed) = self.cache.invalidate_tag_members(tag).await;

        for member in &members {
            self.announce(member, InvalidationAction::Invalidate).await;
        }

        removed
    }

    /// Pre-populates `keys` that are not already cached
    pub async fn warm(&self, keys: &[String]) -> WarmReport {
        let mut report = WarmReport::default();

        for key in keys {
            match self.get(key).await {
                Ok(resolved) if !resolved.hit_backing() => report.skipped += 1,
                Ok(resolved) if resolved.value.is_some() => report.warmed += 1,
                Ok(_) => report.missing += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to warm key");
                    report.failed += 1;
                }
            }
        }

        info!(
            warmed = report.warmed,
            skipped = report.skipped,
            missing = report.missing,
            failed = report.failed,
            "Cache warming finished"
        );

        report
    }

    async fn apply_invalidation(&self, targets: &InvalidationTargets) {
        for key in &targets.keys {
            self.cache.invalidate(key).await;
            self.announce(key, InvalidationAction::Update).await;
        }

        for tag in &targets.tags {
            let (members, _) = self.cache.invalidate_tag_members(tag).await;
            for member in &members {
                self.announce(member, InvalidationAction::Update).await;
            }
        }

        for pattern in &targets.patterns {
            self.cache.invalidate_pattern(pattern).await;
        }

        debug!(
            keys = targets.keys.len(),
            tags = targets.tags.len(),
            patterns = targets.patterns.len(),
            "Applied write invalidation"
        );
    }

    async fn announce(&self, key: &str, action: InvalidationAction) {
        if let Some(channel) = &self.policy.event_channel {
            self.cache.publish_invalidation(channel, key, action).await;
        }
    }

    fn spawn_refresh(&self, key: &str) {
        let service = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            service.refresh(&key).await;
        });
    }

    async fn refresh(&self, key: &str) {
        let resource = self.cache.keys().refresh_resource(key);

        let token = match self.lock.acquire(&resource, self.guard.config().lease).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(key = %key, "Refresh already in progress");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping background refresh");
                return;
            }
        };

        match self.backing.fetch(key).await {
            Ok(Some(value)) => {
                self.cache
                    .set(key, &value, self.policy.ttl, &self.policy.tags)
                    .await;
                debug!(key = %key, "Refreshed stale entry");
            }
            Ok(None) => {
                self.cache
                    .set_negative(key, self.policy.ttl, &self.policy.tags)
                    .await;
            }
            Err(e) => warn!(key = %key, error = %e, "Background refresh failed"),
        }

        self.lock.release(&resource, &token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::StreamExt;
    use serde::Deserialize;
    use tokio::sync::RwLock;

    use crate::domain::{InvalidationEvent, KeyValueStore};
    use crate::infrastructure::single_flight::SingleFlightConfig;
    use crate::infrastructure::store::InMemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u32,
        name: String,
        category: String,
    }

    fn product(id: u32, name: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
            category: "books".to_string(),
        }
    }

    #[derive(Debug, Default)]
    struct ProductTable {
        rows: RwLock<HashMap<String, Product>>,
        fetches: AtomicUsize,
        fetch_delay: Duration,
        write_delay: Duration,
    }

    impl ProductTable {
        fn with_delay(fetch_delay: Duration) -> Self {
            Self {
                fetch_delay,
                ..Default::default()
            }
        }

        fn with_delays(fetch_delay: Duration, write_delay: Duration) -> Self {
            Self {
                fetch_delay,
                write_delay,
                ..Default::default()
            }
        }

        async fn seed(&self, row: Product) {
            self.rows
                .write()
                .await
                .insert(format!("product:{}", row.id), row);
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackingStore for ProductTable {
        type Value = Product;
        type Entity = Product;

        async fn fetch(&self, key: &str) -> Result<Option<Product>, DomainError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            Ok(self.rows.read().await.get(key).cloned())
        }

        async fn write(&self, entity: Product) -> Result<Product, DomainError> {
            if !self.write_delay.is_zero() {
                tokio::time::sleep(self.write_delay).await;
            }
            self.seed(entity.clone()).await;
            Ok(entity)
        }
    }

    fn service(
        store: Arc<InMemoryStore>,
        backing: Arc<ProductTable>,
        policy: CachePolicy,
    ) -> CoordinationService<ProductTable> {
        let cache = ExpiringCache::new(store.clone());
        let lock = DistributedLock::new(store).with_poll_interval(Duration::from_millis(5));
        let guard = SingleFlightGuard::with_config(
            cache,
            lock.clone(),
            SingleFlightConfig {
                lease: Duration::from_secs(5),
                wait: Duration::from_secs(1),
                poll_interval: Duration::from_millis(10),
            },
        );

        CoordinationService::new(backing, guard, lock, policy).with_exclusive_config(
            ExclusiveWriteConfig {
                lease: Duration::from_secs(5),
                max_wait: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_read_through() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        backing.seed(product(1, "Popular Product")).await;
        let service = service(store, backing.clone(), CachePolicy::default());

        let first = service.get("product:1").await.unwrap();
        assert_eq!(first.source, ValueSource::Backing);
        assert_eq!(first.value, Some(product(1, "Popular Product")));

        let second = service.get("product:1").await.unwrap();
        assert_eq!(second.source, ValueSource::Cache);
        assert_eq!(backing.fetches(), 1);
    }

    #[tokio::test]
    async fn test_missing_record_hits_backing_once() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        let service = service(store, backing.clone(), CachePolicy::default());

        for _ in 0..10 {
            let resolved = service.get("product:999999").await.unwrap();
            assert!(resolved.value.is_none());
        }

        assert_eq!(backing.fetches(), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_and_publishes() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        backing.seed(product(1, "Old name")).await;
        backing.seed(product(2, "Sibling")).await;
        let policy = CachePolicy::new(Duration::from_secs(60))
            .with_tag("category:books")
            .with_event_channel("product:updates");
        let service = service(store.clone(), backing.clone(), policy);

        service.get("product:1").await.unwrap();
        service.get("product:2").await.unwrap();

        let mut events = store.subscribe("product:updates").await.unwrap();

        let targets = InvalidationTargets::new().key("product:1");
        let written = service
            .write(product(1, "New name"), &targets)
            .await
            .unwrap();
        assert_eq!(written.name, "New name");

        // Never written through: the next read goes back to the backing store
        assert!(!service.cache().contains("product:1").await);
        assert!(service.cache().contains("product:2").await);

        let event = InvalidationEvent::from_payload(&events.next().await.unwrap()).unwrap();
        assert_eq!(event.key, "product:1");
        assert_eq!(event.action, InvalidationAction::Update);

        let reread = service.get("product:1").await.unwrap();
        assert_eq!(reread.source, ValueSource::Backing);
        assert_eq!(reread.value.unwrap().name, "New name");
    }

    #[tokio::test]
    async fn test_tag_invalidation() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        backing.seed(product(1, "One")).await;
        backing.seed(product(2, "Two")).await;
        let policy = CachePolicy::new(Duration::from_secs(60)).with_tag("category:books");
        let service = service(store.clone(), backing, policy);

        service.get("product:1").await.unwrap();
        service.get("product:2").await.unwrap();

        assert_eq!(service.invalidate_tag("category:books").await, 2);
        assert!(!service.cache().contains("product:1").await);
        assert!(!service.cache().contains("product:2").await);
        assert!(store.get("tag:category:books").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_with_pattern_target() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        let service = service(store, backing, CachePolicy::default());

        service
            .cache()
            .set("product:list:page:1", &[1, 2], Duration::from_secs(60), &[])
            .await;

        let targets = InvalidationTargets::new().pattern("product:list:*");
        service.write(product(3, "Three"), &targets).await.unwrap();

        assert!(!service.cache().contains("product:list:page:1").await);
    }

    #[tokio::test]
    async fn test_write_exclusive_busy() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        let service = service(store.clone(), backing.clone(), CachePolicy::default());

        let lock = DistributedLock::new(store);
        lock.acquire("event:1", Duration::from_secs(10)).await.unwrap();

        let result = service
            .write_exclusive("event:1", product(1, "Booked"), &InvalidationTargets::new())
            .await;

        assert!(matches!(result, Err(DomainError::Busy { .. })));
        assert!(backing.rows.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_exclusive() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        let service = service(store.clone(), backing.clone(), CachePolicy::default());

        let targets = InvalidationTargets::new().key("product:1");
        let written = service
            .write_exclusive("event:1", product(1, "Booked"), &targets)
            .await
            .unwrap();

        assert_eq!(written.name, "Booked");
        assert!(store.get("lock:event:1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_exclusive_write_does_not_stall_fills_of_same_name() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::with_delays(
            Duration::from_millis(20),
            Duration::from_millis(150),
        ));
        let service = service(store, backing.clone(), CachePolicy::default());

        let writer = service.clone();
        let booking = tokio::spawn(async move {
            writer
                .write_exclusive("event:1", product(1, "Booked"), &InvalidationTargets::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut readers = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            readers.push(tokio::spawn(async move { service.get("event:1").await }));
        }

        for reader in readers {
            let resolved = reader.await.unwrap().unwrap();
            assert_ne!(resolved.source, ValueSource::Fallback);
        }
        booking.await.unwrap().unwrap();

        assert_eq!(backing.fetches(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_hit_refreshes_once() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::with_delay(Duration::from_millis(50)));
        backing.seed(product(1, "v1")).await;
        // Every entry is below a threshold larger than its whole lifetime
        let policy = CachePolicy::new(Duration::from_secs(60))
            .with_stale_threshold(Duration::from_secs(600));
        let service = service(store, backing.clone(), policy);

        let first = service.get("product:1").await.unwrap();
        assert_eq!(first.source, ValueSource::Backing);

        backing.seed(product(1, "v2")).await;

        for _ in 0..5 {
            let stale = service.get("product:1").await.unwrap();
            assert_eq!(stale.source, ValueSource::Stale);
        }

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(backing.fetches(), 2);
        let refreshed = service.get("product:1").await.unwrap();
        assert_eq!(refreshed.value.unwrap().name, "v2");
    }

    #[tokio::test]
    async fn test_warm() {
        let store = Arc::new(InMemoryStore::new());
        let backing = Arc::new(ProductTable::default());
        backing.seed(product(1, "One")).await;
        backing.seed(product(2, "Two")).await;
        let service = service(store, backing, CachePolicy::default());

        service.get("product:1").await.unwrap();

        let keys: Vec<String> = ["product:1", "product:2", "product:3"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let report = service.warm(&keys).await;

        assert_eq!(
            report,
            WarmReport {
                warmed: 1,
                skipped: 1,
                missing: 1,
                failed: 0,
            }
        );
        assert!(service.cache().contains("product:2").await);
    }
}
