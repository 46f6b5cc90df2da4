//! Cache infrastructure - Expiring entry cache and the local tier

mod expiring;
mod local;

pub use expiring::{ExpiringCache, ExpiringCacheConfig};
pub use local::{LocalTier, LocalTierConfig};
