//! Castforged-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across castforged:
//!
//! - **Typed IDs**: UUID wrappers for process sessions and recording requests
//! - **Path Utilities**: Per-attempt output paths and partial file cleanup
//! - **Formatting**: Human-readable byte counts and durations for summaries
//! - **Error Handling**: Common error type and result alias
//!
//! # Examples
//!
//! ```
//! use castforged_common::{RecordingId, paths::attempt_output_path};
//! use std::path::Path;
//!
//! let id = RecordingId::new();
//! assert!(!id.to_string().is_empty());
//!
//! let second = attempt_output_path(Path::new("/rec/live.mp4"), 2);
//! assert_eq!(second, Path::new("/rec/live.attempt2.mp4"));
//! ```

pub mod error;
pub mod format;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use format::{human_bytes, human_duration};
pub use ids::*;
