//! # castforged-retry
//!
//! Wraps any fallible async operation in a [`RetryPolicy`]: exponential,
//! linear or fixed backoff, a delay cap, uniform jitter, an attempt limit and
//! an optional overall deadline.
//!
//! The executor knows nothing about what it retries. Each attempt classifies
//! itself as [`AttemptOutcome::Success`], [`AttemptOutcome::Retryable`] or
//! [`AttemptOutcome::Terminal`]; the executor alone decides whether another
//! attempt happens.
//!
//! ```
//! use castforged_retry::{AttemptOutcome, RetryExecutor, RetryOutcome, RetryPolicy};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::quick().with_base_delay(Duration::from_millis(1));
//! let report = RetryExecutor::new()
//!     .run_with_retry(&policy, &CancellationToken::new(), |ctx| async move {
//!         if ctx.attempt < 2 {
//!             AttemptOutcome::Retryable("connection reset")
//!         } else {
//!             AttemptOutcome::Success(ctx.attempt)
//!         }
//!     })
//!     .await;
//!
//! assert!(matches!(report.outcome, RetryOutcome::Success(2)));
//! assert_eq!(report.attempts_made, 2);
//! # });
//! ```

mod error;
mod executor;
mod policy;

pub use error::PolicyError;
pub use executor::{
    AttemptContext, AttemptKind, AttemptOutcome, AttemptRecord, RetryExecutor, RetryOutcome,
    RetryReport, RetryStats,
};
pub use policy::{BackoffStrategy, RetryPolicy, PRESET_NAMES};
