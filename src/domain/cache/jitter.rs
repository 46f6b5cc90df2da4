//! TTL jitter

use std::time::Duration;

use rand::Rng;

use crate::domain::DomainError;

const MIN_TTL: Duration = Duration::from_millis(1);

/// Randomly perturbs TTLs by up to `fraction` of the base in either direction
///
/// Spreading expiry stops entries written together from expiring together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlJitter {
    fraction: f64,
}

impl Default for TtlJitter {
    fn default() -> Self {
        Self { fraction: 0.3 }
    }
}

impl TtlJitter {
    /// Creates a jitter of ±`fraction`; must be in `[0, 1)`
    pub fn new(fraction: f64) -> Result<Self, DomainError> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(DomainError::validation(format!(
                "Jitter fraction must be in [0, 1), got {}",
                fraction
            )));
        }

        Ok(Self { fraction })
    }

    /// No jitter
    pub fn none() -> Self {
        Self { fraction: 0.0 }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Largest offset applied to `base`
    pub fn max_offset(&self, base: Duration) -> Duration {
        base.mul_f64(self.fraction)
    }

    /// Returns `base` shifted by a uniform offset in `[-max, +max]`
    ///
    /// Never returns less than one millisecond, the store's TTL resolution.
    pub fn apply(&self, base: Duration) -> Duration {
        let base = base.max(MIN_TTL);
        let spread = self.max_offset(base).as_millis() as i64;

        if spread == 0 {
            return base;
        }

        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let millis = (base.as_millis() as i64 + offset).max(1);

        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rejects_out_of_range_fraction() {
        assert!(TtlJitter::new(-0.1).is_err());
        assert!(TtlJitter::new(1.0).is_err());
        assert!(TtlJitter::new(0.0).is_ok());
        assert!(TtlJitter::new(0.99).is_ok());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let jitter = TtlJitter::default();
        let base = Duration::from_secs(10);

        for _ in 0..1000 {
            let ttl = jitter.apply(base);
            assert!(ttl >= Duration::from_secs(7));
            assert!(ttl <= Duration::from_secs(13));
        }
    }

    #[test]
    fn test_jitter_is_not_uniform() {
        let jitter = TtlJitter::default();
        let distinct: HashSet<Duration> = (0..100)
            .map(|_| jitter.apply(Duration::from_secs(10)))
            .collect();

        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_no_jitter() {
        let base = Duration::from_secs(10);
        assert_eq!(TtlJitter::none().apply(base), base);
        assert_eq!(TtlJitter::none().max_offset(base), Duration::ZERO);
    }

    #[test]
    fn test_sub_millisecond_ttl_is_clamped() {
        let tiny = Duration::from_micros(600);

        assert_eq!(TtlJitter::none().apply(tiny), Duration::from_millis(1));
        assert_eq!(TtlJitter::default().apply(tiny), Duration::from_millis(1));
        assert!(TtlJitter::default().apply(Duration::from_millis(2)) >= Duration::from_millis(1));
    }

    #[test]
    fn test_max_offset() {
        let jitter = TtlJitter::new(0.3).unwrap();
        assert_eq!(
            jitter.max_offset(Duration::from_secs(10)),
            Duration::from_secs(3)
        );
    }
}
