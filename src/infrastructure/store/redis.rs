//! Redis key-value store

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::domain::DomainError;
use crate::domain::store::{KeyValueStore, PayloadStream};

/// Deletes KEYS[1] only while it still holds ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisStoreConfig {
    /// Creates a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

fn ttl_millis(ttl: Duration, key: &str) -> Result<u64, DomainError> {
    let millis = ttl.as_millis() as u64;

    if millis == 0 {
        return Err(DomainError::validation(format!(
            "Invalid expire time for key '{}'",
            key
        )));
    }

    Ok(millis)
}

/// Redis-backed coordination store
///
/// Features:
/// - Millisecond TTLs (SET PX, PEXPIRE, PTTL)
/// - Atomic SET NX PX and INCR
/// - Server-side compare-and-delete via a Lua script
/// - Pub/Sub on a dedicated connection per subscription
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    compare_and_delete: Script,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Creates a new Redis store connection
    pub async fn new(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| DomainError::store(format!("Failed to create Redis client: {}", e)))?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| DomainError::store("Timed out connecting to Redis"))?
        .map_err(|e| DomainError::store(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            connection,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            config,
        })
    }

    /// Creates a Redis store with default configuration
    pub async fn with_url(url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(RedisStoreConfig::new(url)).await
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        let result: Option<String> = conn
            .get(self.prefix_key(key))
            .await
            .map_err(|e| DomainError::store(format!("Failed to get key '{}': {}", key, e)))?;

        Ok(result)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        let ttl_ms = ttl_millis(ttl, key)?;
        let mut conn = self.connection.clone();

        let _: () = redis::cmd("SET")
            .arg(self.prefix_key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::store(format!("Failed to set key '{}': {}", key, e)))?;

        Ok(())
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let ttl_ms = ttl_millis(ttl, key)?;
        let mut conn = self.connection.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(self.prefix_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::store(format!("Failed to set_nx key '{}': {}", key, e)))?;

        // Redis returns "OK" if set, nil if the key existed
        Ok(result.is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, DomainError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let prefixed: Vec<String> = keys.iter().map(|key| self.prefix_key(key)).collect();
        let mut conn = self.connection.clone();

        let deleted: usize = conn
            .del(&prefixed)
            .await
            .map_err(|e| DomainError::store(format!("Failed to delete keys: {}", e)))?;

        Ok(deleted)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let deleted: i64 = self
            .compare_and_delete
            .key(self.prefix_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::store(format!("Failed to compare-and-delete '{}': {}", key, e))
            })?;

        Ok(deleted > 0)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, DomainError> {
        let prefixed_pattern = self.prefix_key(pattern);
        let mut conn = self.connection.clone();

        // SCAN rather than KEYS so a large keyspace never blocks the server
        let mut cursor = 0u64;
        let mut total_deleted = 0usize;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&prefixed_pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    DomainError::store(format!(
                        "Failed to scan keys with pattern '{}': {}",
                        pattern, e
                    ))
                })?;

            if !keys.is_empty() {
                let deleted: usize = conn
                    .del(&keys)
                    .await
                    .map_err(|e| DomainError::store(format!("Failed to delete keys: {}", e)))?;
                total_deleted += deleted;
            }

            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }

    async fn increment(&self, key: &str) -> Result<i64, DomainError> {
        let mut conn = self.connection.clone();

        let new_value: i64 = conn.incr(self.prefix_key(key), 1).await.map_err(|e| {
            DomainError::store(format!("Failed to increment key '{}': {}", key, e))
        })?;

        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError> {
        let ttl_ms = ttl_millis(ttl, key)?;
        let mut conn = self.connection.clone();

        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(self.prefix_key(key))
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::store(format!("Failed to update TTL for key '{}': {}", key, e))
            })?;

        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        let mut conn = self.connection.clone();

        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(self.prefix_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::store(format!("Failed to get TTL for key '{}': {}", key, e))
            })?;

        // -2 if the key doesn't exist, -1 if it has no TTL
        if ttl_ms < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(ttl_ms as u64)))
        }
    }

    async fn members_of(&self, set_key: &str) -> Result<HashSet<String>, DomainError> {
        let mut conn = self.connection.clone();

        let members: HashSet<String> =
            conn.smembers(self.prefix_key(set_key)).await.map_err(|e| {
                DomainError::store(format!("Failed to read set '{}': {}", set_key, e))
            })?;

        Ok(members)
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let added: i64 = conn
            .sadd(self.prefix_key(set_key), member)
            .await
            .map_err(|e| {
                DomainError::store(format!("Failed to add to set '{}': {}", set_key, e))
            })?;

        Ok(added > 0)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, DomainError> {
        let mut conn = self.connection.clone();

        let receivers: usize = conn.publish(channel, payload).await.map_err(|e| {
            DomainError::store(format!("Failed to publish to '{}': {}", channel, e))
        })?;

        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, DomainError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| DomainError::store(format!("Failed to get pub/sub connection: {}", e)))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| DomainError::store(format!("Failed to subscribe to '{}': {}", channel, e)))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() })
            .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::store(format!("Failed to ping Redis: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running Redis instance
    // Run with: cargo test -- --ignored

    fn get_test_config() -> RedisStoreConfig {
        RedisStoreConfig::new("redis://127.0.0.1:6379").with_key_prefix("cachecoord-test")
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_set_and_get() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        store
            .set_with_expiry("key1", "value1", Duration::from_secs(60))
            .await
            .unwrap();

        let result = store.get("key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));

        store.delete(&["key1".to_string()]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_set_if_absent() {
        let store = RedisStore::new(get_test_config()).await.unwrap();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent_with_expiry("nx_key", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent_with_expiry("nx_key", "b", ttl).await.unwrap());

        store.delete(&["nx_key".to_string()]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_compare_and_delete() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        store
            .set_with_expiry("lock:test", "token-a", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!store.delete_if_equals("lock:test", "token-b").await.unwrap());
        assert!(store.delete_if_equals("lock:test", "token-a").await.unwrap());
        assert!(store.get("lock:test").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_increment_and_ttl() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        assert_eq!(store.increment("counter").await.unwrap(), 1);
        assert!(store.expire("counter", Duration::from_secs(60)).await.unwrap());

        let ttl = store.ttl("counter").await.unwrap();
        assert!(ttl.unwrap().as_secs() > 50);

        store.delete(&["counter".to_string()]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_pubsub() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        let mut stream = store.subscribe("cachecoord-test:events").await.unwrap();
        store.publish("cachecoord-test:events", "key1").await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert_eq!(payload, Some("key1".to_string()));
    }

    #[test]
    fn test_key_prefix() {
        let config = RedisStoreConfig::new("redis://localhost").with_key_prefix("myapp");
        assert_eq!(config.key_prefix, Some("myapp".to_string()));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(ttl_millis(Duration::ZERO, "k").is_err());
        assert_eq!(ttl_millis(Duration::from_secs(2), "k").unwrap(), 2000);
    }
}
