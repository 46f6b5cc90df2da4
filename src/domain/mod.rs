//! Domain layer - Coordination contracts and value types

pub mod backing;
pub mod cache;
pub mod clock;
pub mod error;
pub mod event;
pub mod lock;
pub mod rate_limit;
pub mod store;

pub use backing::BackingStore;
pub use cache::{
    CacheEntry, CachePolicy, CachedValue, Freshness, InvalidationTargets, Resolved, TtlJitter,
    ValueSource,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use event::{InvalidationAction, InvalidationEvent};
pub use lock::LockToken;
pub use rate_limit::{RateLimitDecision, RateLimitPolicy};
pub use store::{KeySpace, KeyValueStore, PayloadStream};
