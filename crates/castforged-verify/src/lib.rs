//! # castforged-verify
//!
//! Decides whether a captured media file is complete enough to keep.
//!
//! Verification never decodes media. It walks container structure from the
//! header and the tail of the file only, so a multi-gigabyte capture is
//! checked in a handful of reads:
//!
//! - MP4/MOV: top-level boxes, `moov` presence, `mvhd` duration
//! - MPEG-TS: packet sync and framing, PCR span
//! - Matroska/WebM: EBML DocType, finalized Segment size, Info duration
//! - FLV: signature and trailing `PreviousTagSize` consistency
//!
//! ## Example
//!
//! ```no_run
//! use castforged_verify::{Expectations, FileVerifier, VerifierConfig};
//! use std::path::Path;
//!
//! let verifier = FileVerifier::new(VerifierConfig::default());
//! let report = verifier.verify(Path::new("capture.ts"), &Expectations::default());
//! if !report.is_complete() {
//!     eprintln!("{}: {}", report.status, report.message.unwrap_or_default());
//! }
//! ```

pub mod container;
pub mod error;
mod verifier;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use container::{container_from_extension, detect_container_from_reader, Container};
pub use error::VerifyError;
pub use verifier::{
    Expectations, FileVerifier, VerificationReport, VerificationStatus, VerifierConfig, VerifierStats,
};
