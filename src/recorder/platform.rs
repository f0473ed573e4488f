//! The seam between the recorder and a streaming service.

use std::path::PathBuf;

use async_trait::async_trait;
use castforged_process::{OutputLine, ProcessRequest, ProcessResult};
use tokio_util::sync::CancellationToken;

/// What a platform needs to know to build one attempt's command.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Where this attempt should write its capture.
    pub output_path: PathBuf,
    pub cancel: CancellationToken,
}

/// A command could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BuildError {
    pub message: String,
    /// Worth trying again on the next attempt (e.g. a lookup that failed on
    /// the network).
    pub transient: bool,
}

impl BuildError {
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }
}

/// A platform's verdict on a failed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Infrastructure trouble; another attempt may work.
    Retryable(String),
    /// The service refused (offline, private, login required); retrying is
    /// pointless.
    Terminal(String),
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Retryable(reason) | Self::Terminal(reason) => reason,
        }
    }
}

/// Progress gathered from capture tool output during one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub segments_downloaded: u64,
    pub last_segment: Option<u64>,
    pub stream_started: bool,
}

/// A streaming service the recorder can capture from.
#[async_trait]
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    /// Build the capture command for one attempt.
    async fn build_command(&self, ctx: &AttemptContext) -> Result<ProcessRequest, BuildError>;

    /// Decide whether a failed (non-zero or signalled) process is worth
    /// retrying.
    fn classify_failure(&self, result: &ProcessResult) -> Classification;

    /// Inspect one line of live tool output.
    fn observe_line(&self, _line: &OutputLine, _progress: &mut Progress) {}
}
