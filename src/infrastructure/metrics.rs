//! Coordination metrics
//!
//! Counters are emitted through the `metrics` facade; they are no-ops
//! until the embedding process installs a recorder.

use metrics::counter;

use crate::domain::ValueSource;

/// Cache tier a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Shared,
}

impl CacheTier {
    fn as_label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Shared => "shared",
        }
    }
}

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Contended,
    TimedOut,
    Released,
    NotOwned,
}

impl LockOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Contended => "contended",
            Self::TimedOut => "timed_out",
            Self::Released => "released",
            Self::NotOwned => "not_owned",
        }
    }
}

pub fn record_cache_hit(tier: CacheTier, negative: bool) {
    let outcome = if negative { "negative_hit" } else { "hit" };
    counter!("cache_lookups_total", "tier" => tier.as_label(), "outcome" => outcome).increment(1);
}

pub fn record_cache_miss(tier: CacheTier) {
    counter!("cache_lookups_total", "tier" => tier.as_label(), "outcome" => "miss").increment(1);
}

/// Records a backing-store query and whether it ran under single-flight
pub fn record_backing_fetch(source: ValueSource) {
    let path = match source {
        ValueSource::Fallback => "fallback",
        _ => "single_flight",
    };
    counter!("backing_fetches_total", "path" => path).increment(1);
}

pub fn record_lock(outcome: LockOutcome) {
    counter!("lock_operations_total", "outcome" => outcome.as_label()).increment(1);
}

pub fn record_rate_limit(allowed: bool) {
    let allowed = if allowed { "true" } else { "false" };
    counter!("rate_limit_checks_total", "allowed" => allowed).increment(1);
}

pub fn record_invalidation(kind: &'static str, removed: usize) {
    counter!("cache_invalidations_total", "kind" => kind).increment(removed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(CacheTier::Local.as_label(), "local");
        assert_eq!(LockOutcome::NotOwned.as_label(), "not_owned");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_hit(CacheTier::Shared, true);
        record_cache_miss(CacheTier::Local);
        record_backing_fetch(ValueSource::Fallback);
        record_lock(LockOutcome::Acquired);
        record_rate_limit(false);
        record_invalidation("tag", 3);
    }
}
