//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, CacheSettings, EventSettings, LocalTierSettings, LockSettings, LogFormat,
    LoggingConfig, RateLimitSettings, SingleFlightSettings, StoreSettings,
};
