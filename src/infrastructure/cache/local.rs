//! In-process L1 tier using moka

use std::time::{Duration, Instant};

use moka::future::Cache as MokaCache;

use crate::domain::DomainError;
use crate::infrastructure::store::glob_to_regex;

/// Configuration for the local tier
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Upper bound on how long an entry may be served locally
    pub ttl: Duration,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100,
            ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct LocalEntry {
    /// Encoded payload exactly as held by the shared store
    raw: String,
    expires_at: Instant,
}

/// Small per-process cache in front of the shared store
///
/// Entries never outlive the shared copy they were read from, and are
/// capped at the tier TTL so a missed invalidation event heals quickly.
#[derive(Debug, Clone)]
pub struct LocalTier {
    cache: MokaCache<String, LocalEntry>,
    config: LocalTierConfig,
}

impl LocalTier {
    pub fn new(config: LocalTierConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();

        Self { cache, config }
    }

    pub fn config(&self) -> &LocalTierConfig {
        &self.config
    }

    /// Returns the raw payload if present and unexpired
    pub async fn get(&self, key: &str) -> Option<String> {
        let entry = self.cache.get(key).await?;

        if Instant::now() >= entry.expires_at {
            self.cache.invalidate(key).await;
            return None;
        }

        Some(entry.raw)
    }

    /// Stores a payload for at most `min(ttl, tier ttl)`
    pub async fn insert(&self, key: &str, raw: &str, ttl: Option<Duration>) {
        let lifetime = ttl.map_or(self.config.ttl, |ttl| ttl.min(self.config.ttl));
        if lifetime.is_zero() {
            return;
        }

        let entry = LocalEntry {
            raw: raw.to_string(),
            expires_at: Instant::now() + lifetime,
        };

        self.cache.insert(key.to_string(), entry).await;
    }

    /// Removes a key, returning whether it was held
    pub async fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    /// Removes every key matching a glob pattern
    pub async fn remove_matching(&self, pattern: &str) -> Result<usize, DomainError> {
        let regex = glob_to_regex(pattern)?;

        self.cache.run_pending_tasks().await;

        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| regex.is_match(key.as_str()))
            .map(|(key, _)| key.to_string())
            .collect();

        for key in &matching {
            self.cache.invalidate(key).await;
        }

        Ok(matching.len())
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for LocalTier {
    fn default() -> Self {
        Self::new(LocalTierConfig::default())
    }
}
