//! Fixed-window rate limiter
//!
//! One counter per actor per wall-clock window. Windows are aligned to
//! multiples of the window width, so an actor can get up to twice the
//! limit through across a boundary.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::{
    Clock, DomainError, KeySpace, KeyValueStore, RateLimitDecision, RateLimitPolicy, SystemClock,
};
use crate::infrastructure::metrics;

/// Rate limiter backed by the shared store
#[derive(Debug, Clone)]
pub struct FixedWindowRateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
    keys: KeySpace,
}

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy,
            keys: KeySpace::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counts a request from `actor` and decides whether it may proceed
    ///
    /// Fails closed: if the store cannot be reached the request is denied
    /// with retry guidance.
    pub async fn check(&self, actor: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let key = self
            .keys
            .rate_window_key(actor, self.policy.window_index(now));
        let until_reset = self.policy.until_next_window(now);

        let count = match self.store.increment(&key).await {
            Ok(count) => count,
            Err(e) => {
                error!(actor = %actor, error = %e, "Rate limit store unavailable, denying request");
                metrics::record_rate_limit(false);
                return RateLimitDecision::denied(self.policy.limit, until_reset);
            }
        };

        // Only the first increment of a window sets its expiry
        if count == 1
            && let Err(e) = self.store.expire(&key, self.policy.window).await
        {
            warn!(key = %key, error = %e, "Failed to set rate window expiry");
        }

        let decision =
            RateLimitDecision::from_count(count.max(0) as u64, self.policy.limit, until_reset);

        metrics::record_rate_limit(decision.allowed);
        if !decision.allowed {
            debug!(
                actor = %actor,
                count = decision.count,
                retry_after = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Reports the current window for `actor` without counting a request
    pub async fn status(&self, actor: &str) -> Result<RateLimitDecision, DomainError> {
        let now = self.clock.now();
        let key = self
            .keys
            .rate_window_key(actor, self.policy.window_index(now));

        let count = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                DomainError::serialization(format!("Invalid rate counter at {}: {}", key, e))
            })?,
            None => 0,
        };

        Ok(RateLimitDecision::peek(
            count,
            self.policy.limit,
            self.policy.until_next_window(now),
        ))
    }

    /// Clears the current window for `actor`
    pub async fn reset(&self, actor: &str) -> Result<bool, DomainError> {
        let key = self
            .keys
            .rate_window_key(actor, self.policy.window_index(self.clock.now()));

        let deleted = self.store.delete(&[key]).await?;
        debug!(actor = %actor, "Rate limit window reset");

        Ok(deleted > 0)
    }
}
