//! Policy validation errors.

/// A [`crate::RetryPolicy`] with out-of-range settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,

    #[error("max_delay ({max:?}) is shorter than base_delay ({base:?})")]
    DelayCapBelowBase {
        base: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("jitter must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),

    #[error("backoff multiplier must be at least 1, got {0}")]
    MultiplierTooSmall(f64),

    #[error("unknown retry preset: {0}")]
    UnknownPreset(String),
}
