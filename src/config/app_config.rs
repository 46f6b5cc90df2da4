use std::time::Duration;

use serde::Deserialize;

use crate::domain::DomainError;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub single_flight: SingleFlightSettings,
    pub rate_limit: RateLimitSettings,
    pub events: EventSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `in_memory` or `redis`
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    /// Jitter applied to every TTL, as a fraction of the base (±)
    pub jitter_fraction: f64,
    /// Negative entries live for `ttl / negative_ttl_divisor`
    pub negative_ttl_divisor: u32,
    /// Extra lifetime given to tag indexes beyond their longest member
    pub tag_safety_margin_secs: u64,
    pub stale_threshold_secs: Option<u64>,
    pub local_tier: LocalTierSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalTierSettings {
    pub enabled: bool,
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub lease_secs: u64,
    pub max_wait_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SingleFlightSettings {
    pub lease_secs: u64,
    pub wait_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub limit: u32,
    pub window_secs: u64,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "in_memory".to_string(),
            redis_url: None,
            key_prefix: None,
            connection_timeout_ms: 5_000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            jitter_fraction: 0.3,
            negative_ttl_divisor: 5,
            tag_safety_margin_secs: 60,
            stale_threshold_secs: None,
            local_tier: LocalTierSettings::default(),
        }
    }
}

impl Default for LocalTierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 100,
            ttl_secs: 5,
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_secs: 10,
            max_wait_ms: 5_000,
            poll_interval_ms: 50,
        }
    }
}

impl Default for SingleFlightSettings {
    fn default() -> Self {
        Self {
            lease_secs: 5,
            wait_ms: 3_000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            window_secs: 60,
            key_prefix: "rate_limit".to_string(),
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            channel: "cache:invalidate".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn tag_safety_margin(&self) -> Duration {
        Duration::from_secs(self.tag_safety_margin_secs)
    }

    pub fn stale_threshold(&self) -> Option<Duration> {
        self.stale_threshold_secs.map(Duration::from_secs)
    }
}

impl LockSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SingleFlightSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl AppConfig {
    /// Loads `config/default`, `config/local`, then `APP__*` variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Rejects settings the coordination components cannot honour
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(0.0..1.0).contains(&self.cache.jitter_fraction) {
            return Err(DomainError::configuration(
                "cache.jitter_fraction must be in [0, 1)",
            ));
        }

        if self.cache.negative_ttl_divisor == 0 {
            return Err(DomainError::configuration(
                "cache.negative_ttl_divisor must be at least 1",
            ));
        }

        if self.cache.local_tier.enabled && self.cache.local_tier.ttl_secs == 0 {
            return Err(DomainError::configuration(
                "cache.local_tier.ttl_secs must be positive",
            ));
        }

        if self.lock.lease_secs == 0 || self.single_flight.lease_secs == 0 {
            return Err(DomainError::configuration("lock leases must be positive"));
        }

        if self.lock.poll_interval_ms == 0 || self.single_flight.poll_interval_ms == 0 {
            return Err(DomainError::configuration("poll intervals must be positive"));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(DomainError::configuration(
                "rate_limit.window_secs must be positive",
            ));
        }

        if self.store.backend.eq_ignore_ascii_case("redis") && self.store.redis_url.is_none() {
            return Err(DomainError::configuration(
                "store.redis_url is required for the redis backend",
            ));
        }

        Ok(())
    }
}
