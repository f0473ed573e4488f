//! The retry loop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::RetryPolicy;

/// What one attempt reports back to the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T, E> {
    Success(T),
    /// Failed, but another attempt may succeed.
    Retryable(E),
    /// Failed in a way no further attempt can fix.
    Terminal(E),
}

/// Final result of [`RetryExecutor::run_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// An attempt reported a terminal failure.
    TerminalFailure(E),
    /// Every allowed attempt failed retryably; carries the last error.
    RetriesExhausted(E),
    /// Cancellation stopped the loop; carries the last error, if any attempt ran.
    Cancelled(Option<E>),
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The error behind a non-successful outcome.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success(_) => None,
            Self::TerminalFailure(e) | Self::RetriesExhausted(e) => Some(e),
            Self::Cancelled(e) => e.as_ref(),
        }
    }
}

/// Per-attempt information passed to the attempt function.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Child of the caller's token; cancelled together with it.
    pub cancel: CancellationToken,
}

impl AttemptContext {
    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    Success,
    Retryable,
    Terminal,
}

/// Timing and classification of one finished attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Pause taken before this attempt started.
    #[serde(serialize_with = "serialize_secs")]
    pub delay_before: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub kind: AttemptKind,
}

/// Everything the executor learned while running one operation.
#[derive(Debug, Clone)]
pub struct RetryReport<T, E> {
    pub outcome: RetryOutcome<T, E>,
    pub attempts_made: u32,
    pub attempts: Vec<AttemptRecord>,
    pub total_duration: Duration,
}

/// Snapshot of executor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub operations: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub terminal: u64,
    pub cancelled: u64,
    pub total_attempts: u64,
}

/// Runs operations under a [`RetryPolicy`].
///
/// Stateless apart from counters, so a single executor can be shared by any
/// number of concurrent operations.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    operations: AtomicU64,
    succeeded: AtomicU64,
    exhausted: AtomicU64,
    terminal: AtomicU64,
    cancelled: AtomicU64,
    total_attempts: AtomicU64,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `attempt_fn` until it succeeds, fails terminally, runs out of
    /// attempts or `cancel` fires.
    ///
    /// Attempts are strictly sequential: the next one is started only after
    /// the previous future has completed. Cancellation is checked before each
    /// attempt, after each failed attempt and throughout every backoff pause.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> RetryReport<T, E>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = AttemptOutcome<T, E>>,
        E: std::fmt::Display,
    {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let max_attempts = policy.max_attempts.max(1);
        let mut records = Vec::new();
        let mut delay_before = Duration::ZERO;
        let mut last_error: Option<E> = None;
        let mut attempt = 1u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break RetryOutcome::Cancelled(last_error.take());
            }

            let ctx = AttemptContext {
                attempt,
                max_attempts,
                cancel: cancel.child_token(),
            };
            tracing::debug!(attempt, max_attempts, "Starting attempt");

            let attempt_started = Instant::now();
            let result = attempt_fn(ctx).await;
            self.total_attempts.fetch_add(1, Ordering::Relaxed);

            let kind = match &result {
                AttemptOutcome::Success(_) => AttemptKind::Success,
                AttemptOutcome::Retryable(_) => AttemptKind::Retryable,
                AttemptOutcome::Terminal(_) => AttemptKind::Terminal,
            };
            records.push(AttemptRecord {
                attempt,
                delay_before,
                duration: attempt_started.elapsed(),
                kind,
            });

            let error = match result {
                AttemptOutcome::Success(value) => break RetryOutcome::Success(value),
                AttemptOutcome::Terminal(error) => {
                    if cancel.is_cancelled() {
                        break RetryOutcome::Cancelled(Some(error));
                    }
                    tracing::warn!(attempt, error = %error, "Attempt failed terminally");
                    break RetryOutcome::TerminalFailure(error);
                }
                AttemptOutcome::Retryable(error) => error,
            };

            if cancel.is_cancelled() {
                break RetryOutcome::Cancelled(Some(error));
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "Retries exhausted");
                break RetryOutcome::RetriesExhausted(error);
            }

            let delay = policy.delay_for(attempt, &mut rand::thread_rng());
            if let Some(deadline) = policy.deadline {
                if started.elapsed() + delay > deadline {
                    tracing::warn!(
                        attempt,
                        deadline_ms = deadline.as_millis() as u64,
                        "Retry deadline reached, giving up"
                    );
                    break RetryOutcome::RetriesExhausted(error);
                }
            }

            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );

            last_error = Some(error);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, "Cancelled during retry delay");
                    break RetryOutcome::Cancelled(last_error.take());
                }
            }

            delay_before = delay;
            attempt += 1;
        };

        let counter = match &outcome {
            RetryOutcome::Success(_) => &self.succeeded,
            RetryOutcome::TerminalFailure(_) => &self.terminal,
            RetryOutcome::RetriesExhausted(_) => &self.exhausted,
            RetryOutcome::Cancelled(_) => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        RetryReport {
            outcome,
            attempts_made: records.len() as u32,
            attempts: records,
            total_duration: started.elapsed(),
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            operations: self.operations.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            terminal: self.terminal.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::quick()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(0.0)
    }

    #[tokio::test]
    async fn always_retryable_exhausts_exactly_n_attempts() {
        for n in 1..=5 {
            let counter = AtomicU32::new(0);
            let calls = &counter;
            let report = RetryExecutor::new()
                .run_with_retry(&fast_policy(n), &CancellationToken::new(), move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    AttemptOutcome::<(), _>::Retryable("connection reset")
                })
                .await;

            assert_matches!(report.outcome, RetryOutcome::RetriesExhausted("connection reset"));
            assert_eq!(report.attempts_made, n);
            assert_eq!(counter.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test]
    async fn terminal_failure_stops_after_one_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let report = RetryExecutor::new()
            .run_with_retry(&fast_policy(5), &CancellationToken::new(), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::<(), _>::Terminal("stream is offline")
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::TerminalFailure("stream is offline"));
        assert_eq!(report.attempts_made, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_retryable_failures() {
        let executor = RetryExecutor::new();
        let report = executor
            .run_with_retry(&fast_policy(5), &CancellationToken::new(), |ctx| async move {
                if ctx.attempt < 3 {
                    AttemptOutcome::Retryable(format!("failure {}", ctx.attempt))
                } else {
                    AttemptOutcome::Success(ctx.attempt)
                }
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::Success(3));
        assert_eq!(report.attempts_made, 3);
        let kinds: Vec<_> = report.attempts.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [AttemptKind::Retryable, AttemptKind::Retryable, AttemptKind::Success]
        );
        assert_eq!(report.attempts[0].delay_before, Duration::ZERO);
        assert!(report.attempts[1].delay_before > Duration::ZERO);

        let stats = executor.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.total_attempts, 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_delay_immediately() {
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(30))
            .with_max_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = RetryExecutor::new()
            .run_with_retry(&policy, &cancel, |_| async {
                AttemptOutcome::<(), _>::Retryable("network unreachable")
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::Cancelled(Some("network unreachable")));
        assert_eq!(report.attempts_made, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let report = RetryExecutor::new()
            .run_with_retry(&fast_policy(3), &cancel, move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::<(), &str>::Success(())
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::Cancelled(None));
        assert_eq!(report.attempts_made, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attempt_sees_cancellation_through_child_token() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let report = RetryExecutor::new()
            .run_with_retry(&fast_policy(3), &cancel, |ctx| {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    ctx.cancel.cancelled().await;
                    AttemptOutcome::<(), _>::Retryable("interrupted")
                }
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::Cancelled(Some("interrupted")));
        assert_eq!(report.attempts_made, 1);
    }

    #[tokio::test]
    async fn deadline_gives_up_early() {
        let policy = RetryPolicy::default()
            .with_max_attempts(10)
            .with_base_delay(Duration::from_secs(5))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(0.0)
            .with_deadline(Some(Duration::from_secs(1)));

        let started = Instant::now();
        let report = RetryExecutor::new()
            .run_with_retry(&policy, &CancellationToken::new(), |_| async {
                AttemptOutcome::<(), _>::Retryable("timeout")
            })
            .await;

        assert_matches!(report.outcome, RetryOutcome::RetriesExhausted("timeout"));
        assert_eq!(report.attempts_made, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn shared_executor_counts_concurrent_operations() {
        let executor = Arc::new(RetryExecutor::new());
        let mut handles = Vec::new();
        for i in 0..4u32 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .run_with_retry(&fast_policy(2), &CancellationToken::new(), move |_| async move {
                        if i % 2 == 0 {
                            AttemptOutcome::Success(i)
                        } else {
                            AttemptOutcome::Terminal("no")
                        }
                    })
                    .await
                    .outcome
                    .is_success()
            }));
        }
        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 2);
        let stats = executor.stats();
        assert_eq!(stats.operations, 4);
        assert_eq!(stats.terminal, 2);
    }
}
