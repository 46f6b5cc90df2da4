//! Fixed-window rate limiting types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::DomainError;

/// Limit and window width for a fixed-window limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub limit: u32,
    /// Window width; windows are aligned to wall-clock multiples of it
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window: Duration) -> Result<Self, DomainError> {
        if window.as_millis() == 0 {
            return Err(DomainError::validation("Rate limit window must be positive"));
        }

        Ok(Self { limit, window })
    }

    fn window_millis(&self) -> i64 {
        self.window.as_millis() as i64
    }

    /// Index of the discrete window containing `now`
    pub fn window_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.window_millis())
    }

    /// Time left until the next window boundary
    pub fn until_next_window(&self, now: DateTime<Utc>) -> Duration {
        let width = self.window_millis();
        let next_boundary = (self.window_index(now) + 1) * width;
        let remaining = next_boundary - now.timestamp_millis();

        Duration::from_millis(remaining.max(0) as u64)
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Total limit for the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Seconds until the window resets
    pub retry_after_seconds: u64,
}

impl RateLimitDecision {
    /// Builds a decision from a post-increment window count
    pub fn from_count(count: u64, limit: u32, until_reset: Duration) -> Self {
        Self {
            allowed: count <= u64::from(limit),
            limit,
            remaining: u64::from(limit).saturating_sub(count) as u32,
            count,
            retry_after_seconds: ceil_secs(until_reset),
        }
    }

    /// Reports a window without consuming from it
    ///
    /// `allowed` says whether one more request would pass.
    pub fn peek(count: u64, limit: u32, until_reset: Duration) -> Self {
        Self {
            allowed: count < u64::from(limit),
            ..Self::from_count(count, limit, until_reset)
        }
    }

    /// Decision used when the limiter cannot consult the store
    pub fn denied(limit: u32, until_reset: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            count: 0,
            retry_after_seconds: ceil_secs(until_reset),
        }
    }

    /// Standard response headers for the request layer
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.retry_after_seconds.to_string()),
        ];

        if !self.allowed {
            headers.push(("Retry-After", self.retry_after_seconds.to_string()));
        }

        headers
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000)
}
