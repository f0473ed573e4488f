//! Common error type used by the castforged helper functions.

use std::path::PathBuf;

/// Common error type for castforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path that was expected to exist is missing.
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
