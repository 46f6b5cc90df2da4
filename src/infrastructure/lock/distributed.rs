//! Lease-based mutual exclusion over the shared store

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::domain::{DomainError, KeySpace, KeyValueStore, LockToken};
use crate::infrastructure::metrics::{self, LockOutcome};

/// Distributed lock
///
/// `UNLOCKED -> LOCKED(owner) -> UNLOCKED`, where the return to unlocked
/// happens either by an owner release or by lease expiry. Only the
/// holder of the current token can release.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    poll_interval: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            keys: KeySpace::default(),
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    /// Interval between attempts in [`Self::with_lock`]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Tries once to take the lock for `lease`
    ///
    /// `Ok(None)` means someone else holds it. Store errors propagate so
    /// the caller can pick its own failure policy.
    pub async fn acquire(
        &self,
        resource: &str,
        lease: Duration,
    ) -> Result<Option<LockToken>, DomainError> {
        let key = self.keys.lock_key(resource);
        let token = LockToken::generate();

        if self
            .store
            .set_if_absent_with_expiry(&key, token.as_str(), lease)
            .await?
        {
            metrics::record_lock(LockOutcome::Acquired);
            debug!(resource = %resource, token = %token, "Lock acquired");
            Ok(Some(token))
        } else {
            metrics::record_lock(LockOutcome::Contended);
            debug!(resource = %resource, "Lock held by another owner");
            Ok(None)
        }
    }

    /// Releases the lock if `token` still owns it
    ///
    /// Returns `false` when the lease already expired or another owner has
    /// taken over; their lock is left untouched.
    pub async fn release(&self, resource: &str, token: &LockToken) -> bool {
        let key = self.keys.lock_key(resource);

        match self.store.delete_if_equals(&key, token.as_str()).await {
            Ok(true) => {
                metrics::record_lock(LockOutcome::Released);
                debug!(resource = %resource, token = %token, "Lock released");
                true
            }
            Ok(false) => {
                metrics::record_lock(LockOutcome::NotOwned);
                warn!(
                    resource = %resource,
                    token = %token,
                    "Lock expired or owned by someone else, not released"
                );
                false
            }
            Err(e) => {
                warn!(resource = %resource, error = %e, "Failed to release lock, lease will expire");
                false
            }
        }
    }

    /// Polls for the lock until `max_wait` elapses
    pub async fn try_acquire_with_retry(
        &self,
        resource: &str,
        lease: Duration,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<Option<LockToken>, DomainError> {
        let deadline = Instant::now() + max_wait;

        loop {
            if let Some(token) = self.acquire(resource, lease).await? {
                return Ok(Some(token));
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::record_lock(LockOutcome::TimedOut);
                debug!(resource = %resource, "Gave up waiting for lock");
                return Ok(None);
            }

            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Runs `section` while holding the lock on `resource`
    ///
    /// Fails with [`DomainError::Busy`] if the lock is not obtained within
    /// `max_wait`. The lock is released whether or not the section
    /// succeeds.
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        lease: Duration,
        max_wait: Duration,
        section: F,
    ) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let token = self
            .try_acquire_with_retry(resource, lease, max_wait, self.poll_interval)
            .await?
            .ok_or_else(|| DomainError::busy(resource))?;

        let result = section().await;

        self.release(resource, &token).await;

        result
    }
}
