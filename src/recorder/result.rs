//! The value a recording request resolves to.

use std::fmt;
use std::path::{Path, PathBuf};

use castforged_common::RecordingId;
use castforged_process::ProcessResult;
use castforged_verify::VerificationReport;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a recording failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The platform could not produce a command.
    CommandBuild,
    /// The capture tool could not be launched.
    Spawn,
    /// The capture tool failed or timed out.
    ProcessFailure,
    /// The capture tool exited cleanly but left no usable file.
    VerificationFailure,
    RetriesExhausted,
    /// The platform reported a condition retrying cannot fix.
    Terminal,
    /// Filesystem trouble around the output path.
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CommandBuild => "command build failed",
            Self::Spawn => "capture tool could not start",
            Self::ProcessFailure => "capture process failed",
            Self::VerificationFailure => "output failed verification",
            Self::RetriesExhausted => "retries exhausted",
            Self::Terminal => "platform reported",
            Self::Io => "I/O error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingResult {
    pub id: RecordingId,
    pub platform: String,
    pub label: Option<String>,
    pub status: RecordingStatus,
    pub failure: Option<FailureKind>,
    /// Only set on success; partial files are never reported here.
    pub output_path: Option<PathBuf>,
    pub attempts_made: u32,
    pub last_process: Option<ProcessResult>,
    pub last_verification: Option<VerificationReport>,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub segments_downloaded: u64,
}

impl RecordingResult {
    pub fn is_success(&self) -> bool {
        self.status == RecordingStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RecordingStatus::Cancelled
    }

    /// Process exit code for the CLI: 0 success, 1 failure, 130 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RecordingStatus::Success => 0,
            RecordingStatus::Failed => 1,
            RecordingStatus::Cancelled => 130,
        }
    }

    /// Write the full result, including the last process output, as pretty
    /// JSON.
    pub fn save_json(&self, path: &Path) -> std::io::Result<()> {
        castforged_common::paths::ensure_parent_dir(path).map_err(|e| std::io::Error::other(e.to_string()))?;
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}
