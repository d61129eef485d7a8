use rand::Rng;
use tokio::time::Duration;

use crate::error::ConfigError;

/// Randomized delay a session waits between two consecutive exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// Reversed bounds are rejected the same way the config loader rejects them.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::PacingRange {
                min_ms: min.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            });
        }
        Ok(Self { min, max })
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_none(&self) -> bool {
        self.max.is_zero()
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_range() {
        let sut = Pacing::default();
        for _ in 0..1_000 {
            let delay = sut.sample();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn fixed_and_none() {
        let sut = Pacing::fixed(Duration::from_millis(20));
        assert_eq!(sut.sample(), Duration::from_millis(20));
        assert!(!sut.is_none());

        let sut = Pacing::none();
        assert_eq!(sut.sample(), Duration::ZERO);
        assert!(sut.is_none());

        let sut = Pacing::from_millis(10, 50).unwrap();
        assert_eq!(sut.min(), Duration::from_millis(10));
        assert_eq!(sut.max(), Duration::from_millis(50));
    }

    #[test]
    fn reversed_bounds_are_rejected() {
        assert_eq!(
            Pacing::from_millis(50, 10),
            Err(ConfigError::PacingRange { min_ms: 50, max_ms: 10 })
        );
        assert!(Pacing::new(Duration::from_secs(1), Duration::from_secs(1)).is_ok());
    }
}
