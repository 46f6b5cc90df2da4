//! The system of record behind the cache

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::domain::DomainError;

/// Slow-to-query source of truth
///
/// `fetch` returning `Ok(None)` means the record does not exist, which is
/// cacheable. An `Err` means the backing store itself failed and is never
/// cached.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Value read from and cached for a key
    type Value: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    /// Input of a write
    type Entity: Send + 'static;

    async fn fetch(&self, key: &str) -> Result<Option<Self::Value>, DomainError>;

    async fn write(&self, entity: Self::Entity) -> Result<Self::Value, DomainError>;
}
