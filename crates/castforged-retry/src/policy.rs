//! Retry policy and backoff computation.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay` every time.
    Fixed,
    /// `base_delay * n` after the n-th failure.
    Linear,
    /// `base_delay * multiplier^(n-1)` after the n-th failure.
    #[default]
    Exponential,
}

/// Names accepted by [`RetryPolicy::preset`].
pub const PRESET_NAMES: &[&str] = &[
    "default",
    "aggressive",
    "conservative",
    "quick",
    "network",
    "file_operation",
    "recording",
];

/// When and how often to re-attempt a failed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay added as uniform random jitter.
    pub jitter: f64,
    pub strategy: BackoffStrategy,
    /// Overall budget; no delay is started that would end past it.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
            strategy: BackoffStrategy::Exponential,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Five quick attempts with gentle growth.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            ..Self::default()
        }
    }

    /// Two attempts, a fixed five second pause.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Fixed,
            ..Self::default()
        }
    }

    /// Three attempts with a 100ms pause, for cheap operations.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Fixed,
            ..Self::default()
        }
    }

    /// Network operations: more attempts, wide jitter, five minute budget.
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            jitter: 0.3,
            deadline: Some(Duration::from_secs(300)),
            ..Self::default()
        }
    }

    pub fn file_operation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            deadline: Some(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// Whole-capture retries: long pauses, four hour budget.
    ///
    /// The budget has to outlast several hour-long captures, or a capture
    /// that times out would never get its retry.
    pub fn recording() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            deadline: Some(Duration::from_secs(4 * 3600)),
            ..Self::default()
        }
    }

    /// Look up a preset by name (see [`PRESET_NAMES`]).
    pub fn preset(name: &str) -> Result<Self, PolicyError> {
        match name {
            "default" => Ok(Self::default()),
            "aggressive" => Ok(Self::aggressive()),
            "conservative" => Ok(Self::conservative()),
            "quick" => Ok(Self::quick()),
            "network" => Ok(Self::network()),
            "file_operation" => Ok(Self::file_operation()),
            "recording" => Ok(Self::recording()),
            other => Err(PolicyError::UnknownPreset(other.to_string())),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Check that every setting is in range.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError::DelayCapBelowBase {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PolicyError::JitterOutOfRange(self.jitter));
        }
        if !(self.multiplier >= 1.0) {
            return Err(PolicyError::MultiplierTooSmall(self.multiplier));
        }
        Ok(())
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let secs = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * n as f64,
            BackoffStrategy::Exponential => base * self.multiplier.powi(n as i32 - 1),
        };
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay after the given failed attempt with jitter applied: the capped
    /// backoff plus a uniform offset in `[0, jitter * backoff]`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff(attempt);
        let spread = delay.as_secs_f64() * self.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return delay;
        }
        delay + Duration::from_secs_f64(rng.gen_range(0.0..=spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(60), Duration::from_secs(5));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = RetryPolicy::file_operation();
        assert_eq!(linear.backoff(1), Duration::from_secs(1));
        assert_eq!(linear.backoff(3), Duration::from_secs(3));
        assert_eq!(linear.backoff(50), Duration::from_secs(10));

        let fixed = RetryPolicy::conservative();
        assert_eq!(fixed.backoff(1), fixed.backoff(7));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::network();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=5 {
            let base = policy.backoff(attempt);
            let upper = base.mul_f64(1.0 + policy.jitter) + Duration::from_nanos(1);
            for _ in 0..100 {
                let delay = policy.delay_for(attempt, &mut rng);
                assert!(delay >= base && delay <= upper, "{delay:?} outside [{base:?}, {upper:?}]");
            }
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::quick().with_jitter(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.delay_for(2, &mut rng), Duration::from_millis(100));
    }

    #[test]
    fn validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_matches!(
            RetryPolicy::default().with_max_attempts(0).validate(),
            Err(PolicyError::NoAttempts)
        );
        assert_matches!(
            RetryPolicy::default()
                .with_base_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(1))
                .validate(),
            Err(PolicyError::DelayCapBelowBase { .. })
        );
        assert_matches!(
            RetryPolicy::default().with_jitter(1.5).validate(),
            Err(PolicyError::JitterOutOfRange(_))
        );
        let mut policy = RetryPolicy::default();
        policy.multiplier = 0.5;
        assert_matches!(policy.validate(), Err(PolicyError::MultiplierTooSmall(_)));
    }

    #[test]
    fn every_preset_is_valid() {
        for name in PRESET_NAMES {
            let policy = RetryPolicy::preset(name).unwrap();
            assert!(policy.validate().is_ok(), "{name}");
        }
        assert_matches!(RetryPolicy::preset("nope"), Err(PolicyError::UnknownPreset(_)));
    }
}
