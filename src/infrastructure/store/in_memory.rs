//! In-process key-value store

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::domain::DomainError;
use crate::domain::store::{KeyValueStore, PayloadStream};

use super::glob_to_regex;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryStoreConfig {
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// Buffered messages per channel before slow subscribers lose events
    pub channel_capacity: usize,
    /// How often expired entries are swept
    pub cleanup_interval: Duration,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            channel_capacity: 256,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl InMemoryStoreConfig {
    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the per-channel buffer
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn text(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: StoredValue::Text(value.to_string()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

fn wrong_type(key: &str) -> DomainError {
    DomainError::store(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

fn require_positive(ttl: Duration, key: &str) -> Result<(), DomainError> {
    if ttl.is_zero() {
        return Err(DomainError::validation(format!(
            "Invalid expire time for key '{}'",
            key
        )));
    }
    Ok(())
}

/// Store held in process memory
///
/// Each operation runs under a single write or read guard, which gives the
/// same per-command atomicity a single-threaded store server provides.
/// Suitable for tests and single-instance deployments.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    last_cleanup: RwLock<Instant>,
    config: InMemoryStoreConfig,
}

impl InMemoryStore {
    /// Creates a new store with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryStoreConfig::default())
    }

    /// Creates a new store with the given configuration
    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
            config,
        }
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn maybe_cleanup(&self) {
        let should_cleanup = {
            let last = self.last_cleanup.read().await;
            last.elapsed() >= self.config.cleanup_interval
        };

        if should_cleanup {
            *self.last_cleanup.write().await = Instant::now();

            let now = Instant::now();
            self.entries.write().await.retain(|_, entry| entry.is_live(now));
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let now = Instant::now();
        let entries = self.entries.read().await;

        match entries.get(&self.prefix_key(key)) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                StoredValue::Text(value) => Ok(Some(value.clone())),
                StoredValue::Set(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        require_positive(ttl, key)?;
        self.maybe_cleanup().await;

        self.entries
            .write()
            .await
            .insert(self.prefix_key(key), StoredEntry::text(value, Some(ttl)));
        Ok(())
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        require_positive(ttl, key)?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let prefixed_key = self.prefix_key(key);

        if entries
            .get(&prefixed_key)
            .is_some_and(|entry| entry.is_live(now))
        {
            return Ok(false);
        }

        entries.insert(prefixed_key, StoredEntry::text(value, Some(ttl)));
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, DomainError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let deleted = keys
            .iter()
            .filter_map(|key| entries.remove(&self.prefix_key(key)))
            .filter(|entry| entry.is_live(now))
            .count();

        Ok(deleted)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let prefixed_key = self.prefix_key(key);

        let matches = match entries.get(&prefixed_key) {
            Some(entry) if entry.is_live(now) => {
                matches!(&entry.value, StoredValue::Text(current) if current == expected)
            }
            _ => false,
        };

        if matches {
            entries.remove(&prefixed_key);
        }

        Ok(matches)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, DomainError> {
        let regex = glob_to_regex(&self.prefix_key(pattern))?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let keys_to_delete: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys_to_delete {
            entries.remove(key);
        }

        Ok(keys_to_delete.len())
    }

    async fn increment(&self, key: &str) -> Result<i64, DomainError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let prefixed_key = self.prefix_key(key);

        let (current, expires_at) = match entries.get(&prefixed_key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                StoredValue::Text(value) => {
                    let current: i64 = value.parse().map_err(|_| {
                        DomainError::store(format!(
                            "Value at key '{}' is not an integer",
                            key
                        ))
                    })?;
                    (current, entry.expires_at)
                }
                StoredValue::Set(_) => return Err(wrong_type(key)),
            },
            _ => (0, None),
        };

        let new_value = current + 1;

        // INCR keeps whatever expiry the key already had
        entries.insert(
            prefixed_key,
            StoredEntry {
                value: StoredValue::Text(new_value.to_string()),
                expires_at,
            },
        );

        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError> {
        require_positive(ttl, key)?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(&self.prefix_key(key)) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        let now = Instant::now();
        let entries = self.entries.read().await;

        match entries.get(&self.prefix_key(key)) {
            Some(entry) if entry.is_live(now) => {
                Ok(entry.expires_at.map(|at| at.saturating_duration_since(now)))
            }
            _ => Ok(None),
        }
    }

    async fn members_of(&self, set_key: &str) -> Result<HashSet<String>, DomainError> {
        let now = Instant::now();
        let entries = self.entries.read().await;

        match entries.get(&self.prefix_key(set_key)) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                StoredValue::Set(members) => Ok(members.clone()),
                StoredValue::Text(_) => Err(wrong_type(set_key)),
            },
            _ => Ok(HashSet::new()),
        }
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<bool, DomainError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let prefixed_key = self.prefix_key(set_key);

        let live = entries
            .get(&prefixed_key)
            .is_some_and(|entry| entry.is_live(now));

        if !live {
            entries.insert(
                prefixed_key.clone(),
                StoredEntry {
                    value: StoredValue::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }

        match entries.get_mut(&prefixed_key).map(|entry| &mut entry.value) {
            Some(StoredValue::Set(members)) => Ok(members.insert(member.to_string())),
            _ => Err(wrong_type(set_key)),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, DomainError> {
        let mut channels = self.channels.write().await;

        let Some(sender) = channels.get(channel) else {
            return Ok(0);
        };

        match sender.send(payload.to_string()) {
            Ok(receivers) => Ok(receivers),
            // Every subscriber has gone away
            Err(_) => {
                channels.remove(channel);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, DomainError> {
        let mut channels = self.channels.write().await;
        let capacity = self.config.channel_capacity;

        let receiver = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        // Lagged receivers skip what they missed; delivery is at-most-once
        let stream = BroadcastStream::new(receiver)
            .filter_map(|message| async move { message.ok() })
            .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();

        store
            .set_with_expiry("key1", "value1", Duration::from_secs(60))
            .await
            .unwrap();

        let result = store.get("key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = InMemoryStore::new();
        let result = store.set_with_expiry("key1", "value1", Duration::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = InMemoryStore::new();

        store
            .set_with_expiry("key1", "value1", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get("key1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get("key1").await.unwrap().is_none());
        assert!(store.ttl("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = InMemoryStore::new();

        let first = store
            .set_if_absent_with_expiry("nx_key", "a", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first);

        let second = store
            .set_if_absent_with_expiry("nx_key", "b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!second);

        assert_eq!(store.get("nx_key").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_set_if_absent_after_expiry() {
        let store = InMemoryStore::new();

        store
            .set_if_absent_with_expiry("nx_key", "a", Duration::from_millis(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let acquired = store
            .set_if_absent_with_expiry("nx_key", "b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_batch_delete_counts_existing() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.set_with_expiry("a", "1", ttl).await.unwrap();
        store.set_with_expiry("b", "2", ttl).await.unwrap();

        let deleted = store.delete(&keys(&["a", "b", "c"])).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemoryStore::new();

        store
            .set_with_expiry("lock:x", "token-a", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!store.delete_if_equals("lock:x", "token-b").await.unwrap());
        assert_eq!(
            store.get("lock:x").await.unwrap(),
            Some("token-a".to_string())
        );

        assert!(store.delete_if_equals("lock:x", "token-a").await.unwrap());
        assert!(store.get("lock:x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.set_with_expiry("user:1:profile", "d1", ttl).await.unwrap();
        store.set_with_expiry("user:2:profile", "d2", ttl).await.unwrap();
        store.set_with_expiry("other:key", "d3", ttl).await.unwrap();

        let deleted = store.delete_matching("user:*:profile").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_increment_keeps_expiry() {
        let store = InMemoryStore::new();

        assert_eq!(store.increment("counter").await.unwrap(), 1);
        assert!(store.ttl("counter").await.unwrap().is_none());

        store
            .expire("counter", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.increment("counter").await.unwrap(), 2);

        let ttl = store.ttl("counter").await.unwrap().unwrap();
        assert!(ttl.as_secs() > 50);
    }

    #[tokio::test]
    async fn test_increment_non_integer() {
        let store = InMemoryStore::new();

        store
            .set_with_expiry("key1", "abc", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.increment("key1").await.is_err());
    }

    #[tokio::test]
    async fn test_expire_missing() {
        let store = InMemoryStore::new();
        let updated = store
            .expire("missing", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = InMemoryStore::new();

        assert!(store.add_to_set("tag:t", "k1").await.unwrap());
        assert!(store.add_to_set("tag:t", "k2").await.unwrap());
        assert!(!store.add_to_set("tag:t", "k1").await.unwrap());

        let members = store.members_of("tag:t").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains("k1"));

        assert!(store.members_of("tag:none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_set_reads_empty() {
        let store = InMemoryStore::new();

        store.add_to_set("tag:t", "k1").await.unwrap();
        store
            .expire("tag:t", Duration::from_millis(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.members_of("tag:t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = InMemoryStore::new();

        store.add_to_set("tag:t", "k1").await.unwrap();
        assert!(store.get("tag:t").await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let store = InMemoryStore::new();
        assert_eq!(store.publish("channel", "hello").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let store = InMemoryStore::new();

        let mut stream = store.subscribe("cache:invalidate").await.unwrap();
        let receivers = store.publish("cache:invalidate", "key1").await.unwrap();
        assert_eq!(receivers, 1);

        let payload = stream.next().await;
        assert_eq!(payload, Some("key1".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_channel_is_pruned() {
        let store = InMemoryStore::new();

        let stream = store.subscribe("cache:invalidate").await.unwrap();
        assert_eq!(store.channels.read().await.len(), 1);

        drop(stream);
        assert_eq!(store.publish("cache:invalidate", "key1").await.unwrap(), 0);
        assert!(store.channels.read().await.is_empty());

        // Resubscribing recreates the channel
        let mut stream = store.subscribe("cache:invalidate").await.unwrap();
        assert_eq!(store.publish("cache:invalidate", "key2").await.unwrap(), 1);
        assert_eq!(stream.next().await, Some("key2".to_string()));
    }

    #[tokio::test]
    async fn test_key_prefix() {
        let store = InMemoryStore::with_config(InMemoryStoreConfig::default().with_key_prefix("app"));

        store
            .set_with_expiry("key1", "value1", Duration::from_secs(60))
            .await
            .unwrap();

        let entries = store.entries.read().await;
        assert!(entries.contains_key("app:key1"));
    }
}
