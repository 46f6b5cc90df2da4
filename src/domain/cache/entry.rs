//! Cached entries and the outcome of a coordinated read

use std::fmt;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use crate::domain::DomainError;

/// Reserved token for negative entries
///
/// Not valid JSON, so no serialized value can ever equal it.
pub(crate) const NEGATIVE_MARKER: &str = "__cachecoord:absent__";

/// A cached payload or the explicit "not found" marker
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue<V> {
    Present(V),
    Absent,
}

impl<V> CachedValue<V> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl<V: Serialize> CachedValue<V> {
    /// Encodes the value for storage
    pub fn encode(&self) -> Result<String, DomainError> {
        match self {
            Self::Present(value) => serde_json::to_string(value).map_err(|e| {
                DomainError::serialization(format!("Failed to serialize cache value: {}", e))
            }),
            Self::Absent => Ok(NEGATIVE_MARKER.to_string()),
        }
    }
}

impl<V: DeserializeOwned> CachedValue<V> {
    /// Decodes a stored payload
    pub fn decode(raw: &str) -> Result<Self, DomainError> {
        if raw == NEGATIVE_MARKER {
            return Ok(Self::Absent);
        }

        serde_json::from_str(raw).map(Self::Present).map_err(|e| {
            DomainError::serialization(format!("Failed to deserialize cache value: {}", e))
        })
    }
}

/// A cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: CachedValue<V>,
    /// Remaining lifetime, when the store reports it
    pub ttl_remaining: Option<Duration>,
    /// Served by the in-process tier rather than the shared store
    pub from_local_tier: bool,
}

impl<V> CacheEntry<V> {
    /// Converts a hit into the answer of a coordinated read
    pub fn into_resolved(self) -> Resolved<V> {
        let source = match (&self.value, self.from_local_tier) {
            (_, true) => ValueSource::LocalTier,
            (CachedValue::Absent, false) => ValueSource::NegativeCache,
            (CachedValue::Present(_), false) => ValueSource::Cache,
        };

        Resolved::new(self.value.into_option(), source)
    }
}

/// Whether a hit is close enough to expiry to warrant a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Where a coordinated read got its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    LocalTier,
    Cache,
    NegativeCache,
    /// Served while a background refresh runs
    Stale,
    Backing,
    /// Fetched directly after the single-flight wait bound elapsed
    Fallback,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalTier => write!(f, "local_tier"),
            Self::Cache => write!(f, "cache"),
            Self::NegativeCache => write!(f, "negative_cache"),
            Self::Stale => write!(f, "stale"),
            Self::Backing => write!(f, "backing"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of a coordinated read
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<V> {
    /// `None` when the backing store has no such record
    pub value: Option<V>,
    pub source: ValueSource,
}

impl<V> Resolved<V> {
    pub fn new(value: Option<V>, source: ValueSource) -> Self {
        Self { value, source }
    }

    /// Whether the backing store was queried for this result
    pub fn hit_backing(&self) -> bool {
        matches!(self.source, ValueSource::Backing | ValueSource::Fallback)
    }
}
