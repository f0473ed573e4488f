//! Error types for castforged-verify

/// Why a structural scan rejected a file.
///
/// These never escape the crate as errors; [`crate::FileVerifier`] folds
/// them into a [`crate::VerificationReport`].
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The header or framing is malformed.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// The structure is valid so far but ends early or lacks its index.
    #[error("truncated: {0}")]
    Truncated(String),

    /// Framing is intact but the trailing index or final size was never
    /// written, as happens when the muxer is killed.
    #[error("missing index: {0}")]
    MissingIndex(String),

    /// Reading the file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn truncated(msg: impl Into<String>) -> Self {
        Self::Truncated(msg.into())
    }

    pub fn missing_index(msg: impl Into<String>) -> Self {
        Self::MissingIndex(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
