//! Outcome of one supervised execution.

use std::time::Duration;

use castforged_common::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The process was killed by a signal the engine did not send.
    Signaled(i32),
    /// The engine terminated the process because its timeout elapsed.
    TimedOut,
    /// The engine terminated the process on a cancellation request.
    Cancelled,
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {}", sig),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub exit: ExitOutcome,
    pub stdout: String,
    pub stderr: String,
    /// Stdout exceeded the engine's capture cap and was cut short.
    pub stdout_truncated: bool,
    /// Stderr exceeded the engine's capture cap and was cut short.
    pub stderr_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl ProcessResult {
    /// Exit code 0 and not killed by the engine.
    pub fn is_success(&self) -> bool {
        self.exit == ExitOutcome::Exited(0)
    }

    /// Exit code, if the process exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            ExitOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.exit == ExitOutcome::TimedOut
    }

    pub fn cancelled(&self) -> bool {
        self.exit == ExitOutcome::Cancelled
    }

    /// Last non-empty line of stderr, falling back to stdout.
    pub fn last_diagnostic(&self) -> Option<&str> {
        last_line(&self.stderr).or_else(|| last_line(&self.stdout))
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(exit: ExitOutcome) -> ProcessResult {
        let now = Utc::now();
        ProcessResult {
            session_id: SessionId::new(),
            pid: Some(42),
            exit,
            stdout: "segment 1 downloaded\n".into(),
            stderr: "warning\nerror: stream is offline\n\n".into(),
            stdout_truncated: false,
            stderr_truncated: false,
            started_at: now,
            finished_at: now,
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn success_requires_zero_exit() {
        assert!(result_with(ExitOutcome::Exited(0)).is_success());
        assert!(!result_with(ExitOutcome::Exited(1)).is_success());
        assert!(!result_with(ExitOutcome::TimedOut).is_success());
        assert!(!result_with(ExitOutcome::Cancelled).is_success());
        assert!(!result_with(ExitOutcome::Signaled(9)).is_success());
    }

    #[test]
    fn exit_code_only_for_exited() {
        assert_eq!(result_with(ExitOutcome::Exited(3)).exit_code(), Some(3));
        assert_eq!(result_with(ExitOutcome::TimedOut).exit_code(), None);
    }

    #[test]
    fn last_diagnostic_prefers_stderr() {
        let result = result_with(ExitOutcome::Exited(1));
        assert_eq!(result.last_diagnostic(), Some("error: stream is offline"));
    }

    #[test]
    fn serializes_exit_outcome() {
        let json = serde_json::to_string(&result_with(ExitOutcome::TimedOut)).unwrap();
        assert!(json.contains("\"exit\":{\"kind\":\"timed_out\"}"), "{json}");
        assert!(json.contains("\"duration\":0.01"));
    }
}
