//! Recording orchestration.
//!
//! A [`Recorder`] drives one capture request through build, execute and
//! verify, retrying under a [`RetryPolicy`] until the output verifies, a
//! terminal failure is reported, attempts run out, or the caller cancels.
//!
//! Per request the recorder moves through
//! `Idle → BuildingCommand → Attempting → Verifying → (Success | RetryPending)`
//! and ends in exactly one terminal state.

pub mod command;
pub mod diagnostics;
pub mod platform;
pub mod result;
pub mod twitcasting;

pub use command::CommandPlatform;
pub use diagnostics::{DiagnosticRule, DiagnosticTable, Verdict};
pub use platform::{AttemptContext, BuildError, Classification, Platform, Progress};
pub use result::{FailureKind, RecordingResult, RecordingStatus};
pub use twitcasting::{parse_url, TwitcastingPlatform, TwitcastingSettings, TwitcastingTarget};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use castforged_common::paths::{attempt_output_path, discard_partial, ensure_parent_dir, mark_partial};
use castforged_common::{human_bytes, human_duration, RecordingId};
use castforged_process::{ProcessEngine, ProcessResult};
use castforged_retry::{AttemptOutcome, RetryExecutor, RetryOutcome, RetryPolicy};
use castforged_verify::{Expectations, FileVerifier, VerificationReport};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What to do with the output of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFileAction {
    #[default]
    Delete,
    /// Rename to `<name>.partial`.
    Rename,
    Keep,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub policy: RetryPolicy,
    /// Timeouts tolerated (and retried) before a timeout becomes terminal.
    pub timeout_ceiling: u32,
    pub partial_file_action: PartialFileAction,
    /// Check the output file after a clean exit.
    pub verify: bool,
    pub expected_duration: Option<Duration>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::recording(),
            timeout_ceiling: 2,
            partial_file_action: PartialFileAction::Delete,
            verify: true,
            expected_duration: None,
        }
    }
}

/// One capture to perform.
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub output_path: PathBuf,
    /// A file the verifier should inspect instead of the attempt path, for
    /// tools that choose their own output name.
    pub expected_output: Option<PathBuf>,
    pub label: Option<String>,
}

impl RecordingRequest {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            expected_output: None,
            label: None,
        }
    }

    pub fn with_expected_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_output = Some(path.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Where attempt `attempt` writes.
    pub fn attempt_path(&self, attempt: u32) -> PathBuf {
        attempt_output_path(&self.output_path, attempt)
    }

    /// The file verified after attempt `attempt`.
    pub fn verified_path(&self, attempt: u32) -> PathBuf {
        self.expected_output.clone().unwrap_or_else(|| self.attempt_path(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Idle,
    BuildingCommand,
    Attempting,
    Verifying,
    RetryPending,
    Terminal(RecordingStatus),
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::BuildingCommand => write!(f, "building_command"),
            Self::Attempting => write!(f, "attempting"),
            Self::Verifying => write!(f, "verifying"),
            Self::RetryPending => write!(f, "retry_pending"),
            Self::Terminal(status) => write!(f, "terminal({status})"),
        }
    }
}

/// Why one attempt failed.
#[derive(Debug, Clone)]
struct AttemptFailure {
    kind: FailureKind,
    reason: String,
}

impl AttemptFailure {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// State shared by the attempts of one request.
#[derive(Debug, Default)]
struct Tracker {
    timeouts: u32,
    segments_downloaded: u64,
    last_process: Option<ProcessResult>,
    last_verification: Option<VerificationReport>,
    /// File the current attempt's process brought into existence. Only this
    /// file is subject to the partial file action.
    created_output: Option<PathBuf>,
}

/// Snapshot of recorder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub recordings: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub segments_downloaded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    recordings: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    segments_downloaded: AtomicU64,
}

/// Orchestrates capture, verification and retry for recording requests.
///
/// The engine, executor and verifier are shared; one recorder can run any
/// number of requests concurrently.
pub struct Recorder {
    engine: Arc<ProcessEngine>,
    retry: Arc<RetryExecutor>,
    verifier: Arc<FileVerifier>,
    settings: RecorderSettings,
    counters: Counters,
}

impl Recorder {
    pub fn new(
        engine: Arc<ProcessEngine>,
        retry: Arc<RetryExecutor>,
        verifier: Arc<FileVerifier>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            engine,
            retry,
            verifier,
            settings,
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.engine
    }

    pub fn stats(&self) -> RecorderStats {
        let c = &self.counters;
        RecorderStats {
            recordings: c.recordings.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            segments_downloaded: c.segments_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Record `request` from `platform` until it succeeds, fails or `cancel`
    /// fires.
    pub async fn record(
        &self,
        platform: &dyn Platform,
        request: RecordingRequest,
        cancel: &CancellationToken,
    ) -> RecordingResult {
        let id = RecordingId::new();
        let started_at = Utc::now();
        let tracker = Mutex::new(Tracker::default());
        self.counters.recordings.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            recording_id = %id,
            platform = platform.name(),
            output = %request.output_path.display(),
            max_attempts = self.settings.policy.max_attempts,
            "Recording started"
        );
        transition(id, RecordingState::Idle);

        let tracker_ref = &tracker;
        let request_ref = &request;
        let report = self
            .retry
            .run_with_retry(&self.settings.policy, cancel, move |ctx| async move {
                let is_last = ctx.is_last();
                let attempt = ctx.attempt;
                let outcome = self
                    .attempt(id, platform, request_ref, attempt, ctx.cancel, tracker_ref)
                    .await;
                let created = tracker_ref.lock().created_output.take();
                let failed = !matches!(outcome, AttemptOutcome::Success(_)) && !cancel.is_cancelled();
                if failed {
                    if matches!(outcome, AttemptOutcome::Retryable(_)) && !is_last {
                        transition(id, RecordingState::RetryPending);
                    }
                    match created {
                        Some(path) => self.handle_partial(&path),
                        None => tracing::debug!(
                            recording_id = %id,
                            attempt,
                            "No output created by this attempt, nothing to clean up"
                        ),
                    }
                }
                outcome
            })
            .await;

        let tracker = tracker.into_inner();
        let attempts_made = report.attempts_made;
        let (status, failure, output_path, summary) = match report.outcome {
            RetryOutcome::Success(path) => {
                let summary = success_summary(&path, attempts_made, &tracker);
                (RecordingStatus::Success, None, Some(path), summary)
            }
            RetryOutcome::TerminalFailure(failure) => {
                let summary = format!("{} after {} attempt(s)", failure, attempts_made);
                (RecordingStatus::Failed, Some(failure.kind), None, summary)
            }
            RetryOutcome::RetriesExhausted(failure) => {
                let summary = format!(
                    "retries exhausted after {} attempt(s); last failure: {}",
                    attempts_made, failure
                );
                (RecordingStatus::Failed, Some(FailureKind::RetriesExhausted), None, summary)
            }
            RetryOutcome::Cancelled(_) => (
                RecordingStatus::Cancelled,
                None,
                None,
                format!("cancelled after {} attempt(s)", attempts_made),
            ),
        };

        transition(id, RecordingState::Terminal(status));
        let counter = match status {
            RecordingStatus::Success => &self.counters.succeeded,
            RecordingStatus::Failed => &self.counters.failed,
            RecordingStatus::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters
            .segments_downloaded
            .fetch_add(tracker.segments_downloaded, Ordering::Relaxed);

        match status {
            RecordingStatus::Success => tracing::info!(recording_id = %id, "{summary}"),
            RecordingStatus::Failed => tracing::error!(recording_id = %id, "{summary}"),
            RecordingStatus::Cancelled => tracing::warn!(recording_id = %id, "{summary}"),
        }

        RecordingResult {
            id,
            platform: platform.name().to_string(),
            label: request.label,
            status,
            failure,
            output_path,
            attempts_made,
            last_process: tracker.last_process,
            last_verification: tracker.last_verification,
            summary,
            started_at,
            finished_at: Utc::now(),
            segments_downloaded: tracker.segments_downloaded,
        }
    }

    async fn attempt(
        &self,
        id: RecordingId,
        platform: &dyn Platform,
        request: &RecordingRequest,
        attempt: u32,
        cancel: CancellationToken,
        tracker: &Mutex<Tracker>,
    ) -> AttemptOutcome<PathBuf, AttemptFailure> {
        transition(id, RecordingState::BuildingCommand);
        let output_path = request.attempt_path(attempt);
        if let Err(e) = ensure_parent_dir(&output_path) {
            return AttemptOutcome::Terminal(AttemptFailure::new(FailureKind::Io, e.to_string()));
        }

        let ctx = AttemptContext {
            attempt,
            output_path: output_path.clone(),
            cancel: cancel.clone(),
        };
        let built = tokio::select! {
            built = platform.build_command(&ctx) => built,
            _ = cancel.cancelled() => {
                return AttemptOutcome::Retryable(AttemptFailure::new(
                    FailureKind::CommandBuild,
                    "cancelled while building command",
                ));
            }
        };
        let process_request = match built {
            Ok(r) => r,
            Err(e) if e.transient => {
                return AttemptOutcome::Retryable(AttemptFailure::new(FailureKind::CommandBuild, e.message))
            }
            Err(e) => return AttemptOutcome::Terminal(AttemptFailure::new(FailureKind::CommandBuild, e.message)),
        };

        transition(id, RecordingState::Attempting);
        tracing::info!(
            recording_id = %id,
            attempt,
            command = %process_request.display_command(),
            "Launching capture"
        );

        let verified_path = request.verified_path(attempt);
        let preexisting = verified_path.exists();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut progress = Progress::default();
        let (executed, ()) = tokio::join!(self.engine.execute_observed(process_request, &cancel, Some(tx)), async {
            while let Some(line) = rx.recv().await {
                platform.observe_line(&line, &mut progress);
            }
        });

        let result = match executed {
            Ok(result) => result,
            Err(e) if e.is_spawn() => {
                return AttemptOutcome::Terminal(AttemptFailure::new(FailureKind::Spawn, e.to_string()))
            }
            Err(e) => return AttemptOutcome::Retryable(AttemptFailure::new(FailureKind::Io, e.to_string())),
        };

        let timeouts = {
            let mut t = tracker.lock();
            t.segments_downloaded += progress.segments_downloaded;
            t.last_process = Some(result.clone());
            if !preexisting {
                t.created_output = Some(verified_path.clone());
            }
            if result.timed_out() {
                t.timeouts += 1;
            }
            t.timeouts
        };

        if result.cancelled() {
            return AttemptOutcome::Retryable(AttemptFailure::new(FailureKind::ProcessFailure, "cancelled"));
        }

        if result.timed_out() {
            let failure = AttemptFailure::new(FailureKind::ProcessFailure, format!("timed out ({timeouts} so far)"));
            return if timeouts > self.settings.timeout_ceiling {
                AttemptOutcome::Terminal(failure)
            } else {
                AttemptOutcome::Retryable(failure)
            };
        }

        if !result.is_success() {
            return match platform.classify_failure(&result) {
                Classification::Terminal(reason) => {
                    AttemptOutcome::Terminal(AttemptFailure::new(FailureKind::Terminal, reason))
                }
                Classification::Retryable(reason) => AttemptOutcome::Retryable(AttemptFailure::new(
                    FailureKind::ProcessFailure,
                    format!("infrastructure: {reason}"),
                )),
            };
        }

        if !self.settings.verify {
            return AttemptOutcome::Success(verified_path);
        }

        transition(id, RecordingState::Verifying);
        let expect = Expectations {
            elapsed: Some(result.duration),
            expected_duration: self.settings.expected_duration,
            ..Expectations::default()
        };
        let report = self.verifier.verify_async(&verified_path, &expect).await;
        let complete = report.is_complete();
        let detail = match &report.message {
            Some(message) => format!("output {}: {message}", report.status),
            None => format!("output {}", report.status),
        };
        tracker.lock().last_verification = Some(report);

        if complete {
            AttemptOutcome::Success(verified_path)
        } else {
            AttemptOutcome::Retryable(AttemptFailure::new(FailureKind::VerificationFailure, detail))
        }
    }

    fn handle_partial(&self, path: &Path) {
        let outcome = match self.settings.partial_file_action {
            PartialFileAction::Keep => return,
            PartialFileAction::Delete => discard_partial(path).map(|removed| removed.then(|| "deleted".to_string())),
            PartialFileAction::Rename => {
                if !path.exists() {
                    return;
                }
                mark_partial(path).map(|to| Some(format!("renamed to {}", to.display())))
            }
        };
        match outcome {
            Ok(Some(action)) => tracing::debug!(path = %path.display(), "Partial file {action}"),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to clean up partial file"),
        }
    }
}

fn transition(id: RecordingId, state: RecordingState) {
    tracing::debug!(recording_id = %id, state = %state, "Recording state");
}

fn success_summary(path: &Path, attempts: u32, tracker: &Tracker) -> String {
    let size = tracker
        .last_verification
        .as_ref()
        .map(|r| r.size)
        .or_else(|| std::fs::metadata(path).ok().map(|m| m.len()))
        .unwrap_or(0);
    let duration = tracker
        .last_verification
        .as_ref()
        .and_then(|r| r.duration)
        .or_else(|| tracker.last_process.as_ref().map(|p| p.duration))
        .unwrap_or_default();
    format!(
        "recorded {} ({}) to {} in {} attempt(s)",
        human_bytes(size),
        human_duration(duration),
        path.display(),
        attempts
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn attempt_paths_follow_request() {
        let request = RecordingRequest::new("/rec/live.ts");
        assert_eq!(request.verified_path(1), PathBuf::from("/rec/live.ts"));
        assert_eq!(request.verified_path(3), PathBuf::from("/rec/live.attempt3.ts"));

        let fixed = request.with_expected_output("/rec/fixed.mp4");
        assert_eq!(fixed.attempt_path(2), PathBuf::from("/rec/live.attempt2.ts"));
        assert_eq!(fixed.verified_path(2), PathBuf::from("/rec/fixed.mp4"));
    }

    fn recorder(action: PartialFileAction) -> Recorder {
        Recorder::new(
            Arc::new(ProcessEngine::default()),
            Arc::new(RetryExecutor::new()),
            Arc::new(FileVerifier::default()),
            RecorderSettings {
                partial_file_action: action,
                ..Default::default()
            },
        )
    }

    #[test]
    fn partial_file_actions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ts");

        std::fs::write(&path, b"partial").unwrap();
        recorder(PartialFileAction::Keep).handle_partial(&path);
        assert!(path.exists());

        recorder(PartialFileAction::Rename).handle_partial(&path);
        assert!(!path.exists());
        assert!(dir.path().join("a.ts.partial").exists());

        std::fs::write(&path, b"partial").unwrap();
        recorder(PartialFileAction::Delete).handle_partial(&path);
        assert!(!path.exists());

        // Nothing to clean up is not an error.
        recorder(PartialFileAction::Delete).handle_partial(&path);
        recorder(PartialFileAction::Rename).handle_partial(&path);
    }

    #[test]
    fn partial_action_parses_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            action: PartialFileAction,
        }
        let parsed: Wrapper = toml::from_str("action = \"rename\"").unwrap();
        assert_eq!(parsed.action, PartialFileAction::Rename);
    }

    #[test]
    fn state_names() {
        assert_eq!(RecordingState::BuildingCommand.to_string(), "building_command");
        assert_eq!(
            RecordingState::Terminal(RecordingStatus::Cancelled).to_string(),
            "terminal(cancelled)"
        );
    }
}
