//! Key-value store trait definition

use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Stream of raw payloads received on a subscribed channel
pub type PayloadStream = BoxStream<'static, String>;

/// Minimal contract over a shared, TTL-capable key-value store
///
/// Every operation is individually atomic at the store. No cross-key
/// atomicity is assumed except for `delete_if_equals`, which must be a
/// single server-side operation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Gets a raw value
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Sets a raw value with a TTL
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), DomainError>;

    /// Sets a value only if the key doesn't exist (SET NX PX)
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError>;

    /// Deletes keys in one batch, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize, DomainError>;

    /// Deletes `key` only if its current value equals `expected`
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, DomainError>;

    /// Deletes all keys matching a glob pattern
    async fn delete_matching(&self, pattern: &str) -> Result<usize, DomainError>;

    /// Increments a counter by one, creating it at zero if missing
    async fn increment(&self, key: &str) -> Result<i64, DomainError>;

    /// Updates the TTL for an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DomainError>;

    /// Gets the remaining TTL for a key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError>;

    /// Reads the members of a set (empty when missing or expired)
    async fn members_of(&self, set_key: &str) -> Result<HashSet<String>, DomainError>;

    /// Adds a member to a set
    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<bool, DomainError>;

    /// Publishes a payload, returning the number of receivers
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, DomainError>;

    /// Subscribes to a channel
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, DomainError>;

    /// Checks connectivity
    async fn ping(&self) -> Result<(), DomainError>;
}
