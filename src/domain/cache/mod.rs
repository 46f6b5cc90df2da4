//! Cache domain - entries, TTL jitter and caching policies

mod entry;
mod jitter;
mod policy;

pub use entry::{CacheEntry, CachedValue, Freshness, Resolved, ValueSource};
pub use jitter::TtlJitter;
pub use policy::{CachePolicy, InvalidationTargets};
