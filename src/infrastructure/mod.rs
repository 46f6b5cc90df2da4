//! Infrastructure layer - Store adapters and coordination components

pub mod cache;
pub mod events;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod services;
pub mod single_flight;
pub mod store;
