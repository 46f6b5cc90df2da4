//! Typed cache with jittered TTLs, negative entries and tag indexes

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::LocalTier;
use crate::domain::{
    CacheEntry, CachedValue, Freshness, InvalidationAction, InvalidationEvent, KeySpace,
    KeyValueStore, TtlJitter,
};
use crate::infrastructure::metrics::{self, CacheTier};

/// Configuration for the expiring cache
#[derive(Debug, Clone)]
pub struct ExpiringCacheConfig {
    pub jitter: TtlJitter,
    /// Negative entries live for `ttl / negative_ttl_divisor`
    pub negative_ttl_divisor: u32,
    /// Added to a tag index lifetime on top of its longest member
    pub tag_safety_margin: Duration,
}

impl Default for ExpiringCacheConfig {
    fn default() -> Self {
        Self {
            jitter: TtlJitter::default(),
            negative_ttl_divisor: 5,
            tag_safety_margin: Duration::from_secs(60),
        }
    }
}

impl ExpiringCacheConfig {
    pub fn with_jitter(mut self, jitter: TtlJitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_negative_ttl_divisor(mut self, divisor: u32) -> Self {
        self.negative_ttl_divisor = divisor.max(1);
        self
    }

    pub fn with_tag_safety_margin(mut self, margin: Duration) -> Self {
        self.tag_safety_margin = margin;
        self
    }
}

/// Cache over the shared store
///
/// The store is best-effort from the cache's point of view: read errors
/// are misses and write errors are logged and swallowed, so callers fall
/// through to the backing store whenever the coordination store is down.
#[derive(Debug, Clone)]
pub struct ExpiringCache {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    config: ExpiringCacheConfig,
    local: Option<LocalTier>,
}

impl ExpiringCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, ExpiringCacheConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: ExpiringCacheConfig) -> Self {
        Self {
            store,
            keys: KeySpace::default(),
            config,
            local: None,
        }
    }

    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    /// Puts an in-process tier in front of the shared store
    pub fn with_local_tier(mut self, local: LocalTier) -> Self {
        self.local = Some(local);
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn config(&self) -> &ExpiringCacheConfig {
        &self.config
    }

    pub fn local_tier(&self) -> Option<&LocalTier> {
        self.local.as_ref()
    }

    /// Looks up a key, positive or negative
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.get_local(key).await {
            return Some(entry);
        }

        self.get_shared(key, self.local.is_some()).await
    }

    /// Looks up a key and classifies it against a remaining-TTL threshold
    ///
    /// Entries whose remaining lifetime is unknown count as fresh.
    pub async fn get_with_staleness<V: DeserializeOwned>(
        &self,
        key: &str,
        stale_threshold: Duration,
    ) -> Option<(CacheEntry<V>, Freshness)> {
        let entry = match self.get_local(key).await {
            Some(entry) => entry,
            None => self.get_shared(key, true).await?,
        };

        let freshness = match entry.ttl_remaining {
            Some(remaining) if remaining < stale_threshold => Freshness::Stale,
            _ => Freshness::Fresh,
        };

        Some((entry, freshness))
    }

    /// Whether a key currently holds a positive or negative entry
    pub async fn contains(&self, key: &str) -> bool {
        if let Some(local) = &self.local
            && local.get(key).await.is_some()
        {
            return true;
        }

        match self.store.get(key).await {
            Ok(raw) => raw.is_some(),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                false
            }
        }
    }

    /// Writes a value under a jittered TTL and indexes it under `tags`
    ///
    /// Returns whether the value itself was written.
    pub async fn set<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        tags: &[String],
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.write(key, &raw, ttl, tags).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value");
                false
            }
        }
    }

    /// Records that `key` has no value in the backing store
    ///
    /// The entry lives for a fraction of `ttl`.
    pub async fn set_negative(&self, key: &str, ttl: Duration, tags: &[String]) -> bool {
        let negative_ttl = ttl / self.config.negative_ttl_divisor.max(1);

        match CachedValue::<()>::Absent.encode() {
            Ok(raw) => self.write(key, &raw, negative_ttl, tags).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode negative entry");
                false
            }
        }
    }

    /// Removes a single key, returning whether it existed in the shared store
    pub async fn invalidate(&self, key: &str) -> bool {
        if let Some(local) = &self.local {
            local.remove(key).await;
        }

        match self.store.delete(&[key.to_string()]).await {
            Ok(deleted) => {
                metrics::record_invalidation("key", deleted);
                debug!(key = %key, deleted, "Invalidated cache key");
                deleted > 0
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to invalidate cache key");
                false
            }
        }
    }

    /// Removes every entry indexed under `tag`, and the index itself
    ///
    /// Returns the number of member entries removed. An empty or expired
    /// index is a no-op.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.invalidate_tag_members(tag).await.1
    }

    /// Like [`Self::invalidate_by_tag`], also returning the member keys
    pub(crate) async fn invalidate_tag_members(&self, tag: &str) -> (Vec<String>, usize) {
        let tag_key = self.keys.tag_key(tag);

        let members = match self.store.members_of(&tag_key).await {
            Ok(members) => members,
            Err(e) => {
                warn!(tag = %tag, error = %e, "Failed to read tag index");
                return (Vec::new(), 0);
            }
        };

        if members.is_empty() {
            debug!(tag = %tag, "Tag index empty, nothing to invalidate");
            return (Vec::new(), 0);
        }

        if let Some(local) = &self.local {
            for member in &members {
                local.remove(member).await;
            }
        }

        let members: Vec<String> = members.into_iter().collect();
        let mut batch = members.clone();
        batch.push(tag_key);

        match self.store.delete(&batch).await {
            Ok(deleted) => {
                // The index was non-empty a moment ago and outlives its members
                let removed = deleted.saturating_sub(1);
                metrics::record_invalidation("tag", removed);
                debug!(tag = %tag, removed, "Invalidated tag");
                (members, removed)
            }
            Err(e) => {
                warn!(tag = %tag, error = %e, "Failed to invalidate tag");
                (members, 0)
            }
        }
    }

    /// Removes every key matching a glob pattern such as `post:*`
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        if let Some(local) = &self.local
            && let Err(e) = local.remove_matching(pattern).await
        {
            warn!(pattern = %pattern, error = %e, "Failed to invalidate local tier");
        }

        match self.store.delete_matching(pattern).await {
            Ok(removed) => {
                metrics::record_invalidation("pattern", removed);
                debug!(pattern = %pattern, removed, "Invalidated pattern");
                removed
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Failed to invalidate pattern");
                0
            }
        }
    }

    /// Announces an invalidation to other processes
    ///
    /// Fire-and-forget: returns the receiver count, or 0 when publishing
    /// failed.
    pub async fn publish_invalidation(
        &self,
        channel: &str,
        key: &str,
        action: InvalidationAction,
    ) -> usize {
        let payload = match InvalidationEvent::new(key, action).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode invalidation event");
                return 0;
            }
        };

        match self.store.publish(channel, &payload).await {
            Ok(receivers) => {
                debug!(channel = %channel, key = %key, %action, receivers, "Published invalidation");
                receivers
            }
            Err(e) => {
                warn!(channel = %channel, key = %key, error = %e, "Failed to publish invalidation");
                0
            }
        }
    }

    async fn get_local<V: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<V>> {
        let local = self.local.as_ref()?;

        let Some(raw) = local.get(key).await else {
            metrics::record_cache_miss(CacheTier::Local);
            return None;
        };

        match CachedValue::decode(&raw) {
            Ok(value) => {
                metrics::record_cache_hit(CacheTier::Local, value.is_absent());
                Some(CacheEntry {
                    key: key.to_string(),
                    value,
                    ttl_remaining: None,
                    from_local_tier: true,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable local entry");
                local.remove(key).await;
                None
            }
        }
    }

    async fn get_shared<V: DeserializeOwned>(
        &self,
        key: &str,
        with_ttl: bool,
    ) -> Option<CacheEntry<V>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_miss(CacheTier::Shared);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_miss(CacheTier::Shared);
                return None;
            }
        };

        let value = match CachedValue::decode(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                metrics::record_cache_miss(CacheTier::Shared);
                return None;
            }
        };

        metrics::record_cache_hit(CacheTier::Shared, value.is_absent());

        let ttl_remaining = if with_ttl {
            self.store.ttl(key).await.unwrap_or_else(|e| {
                debug!(key = %key, error = %e, "Failed to read remaining TTL");
                None
            })
        } else {
            None
        };

        if let Some(local) = &self.local {
            local.insert(key, &raw, ttl_remaining).await;
        }

        Some(CacheEntry {
            key: key.to_string(),
            value,
            ttl_remaining,
            from_local_tier: false,
        })
    }

    async fn write(&self, key: &str, raw: &str, ttl: Duration, tags: &[String]) -> bool {
        if ttl.is_zero() {
            // Already expired: drop whatever the key held instead
            debug!(key = %key, "Zero TTL, removing instead of writing");
            self.invalidate(key).await;
            return false;
        }

        let jittered = self.config.jitter.apply(ttl);

        if let Err(e) = self.store.set_with_expiry(key, raw, jittered).await {
            warn!(key = %key, error = %e, "Cache write failed");
            return false;
        }

        if let Some(local) = &self.local {
            local.insert(key, raw, Some(jittered)).await;
        }

        if !tags.is_empty() {
            self.index_under_tags(key, ttl, tags).await;
        }

        debug!(key = %key, ttl_ms = jittered.as_millis() as u64, "Cached entry");
        true
    }

    async fn index_under_tags(&self, key: &str, ttl: Duration, tags: &[String]) {
        let index_ttl = ttl + self.config.jitter.max_offset(ttl) + self.config.tag_safety_margin;

        for tag in tags {
            let tag_key = self.keys.tag_key(tag);

            if let Err(e) = self.store.add_to_set(&tag_key, key).await {
                warn!(key = %key, tag = %tag, error = %e, "Failed to index entry under tag");
                continue;
            }

            // Extend only: the index must outlive its longest-lived member
            let current = self.store.ttl(&tag_key).await.unwrap_or(None);
            if current.is_none_or(|remaining| remaining < index_ttl)
                && let Err(e) = self.store.expire(&tag_key, index_ttl).await
            {
                warn!(tag = %tag, error = %e, "Failed to extend tag index expiry");
            }
        }
    }
}
