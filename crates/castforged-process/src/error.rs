//! Error types for castforged-process.

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors raised by the process engine.
///
/// A process that starts and then exits badly is not an error; it is reported
/// through [`crate::ProcessResult`]. These variants cover the cases where no
/// meaningful result can be produced.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be launched (not found, permission denied).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The request is malformed.
    #[error("invalid process request: {0}")]
    InvalidRequest(String),

    /// Waiting on the child or draining its output failed.
    #[error("I/O error while supervising process: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Create a spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether the failure happened before any process existed.
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}
