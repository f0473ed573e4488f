//! Completeness verification for captured files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::container::{self, Container};
use crate::error::VerifyError;

/// Thresholds applied after the structural scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Minimum plausible data rate for a recording of known wall time.
    pub min_bytes_per_sec: u64,
    /// Fraction of the expected duration a file must reach.
    pub duration_tolerance: f64,
    /// Files smaller than this cannot hold a usable recording.
    pub min_size: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            min_bytes_per_sec: 16 * 1024,
            duration_tolerance: 0.9,
            min_size: 1024,
        }
    }
}

/// What the caller knows about the file being checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectations {
    /// Container to assume when the magic bytes are not recognised.
    pub format: Option<Container>,
    /// Wall time the capture ran for.
    pub elapsed: Option<Duration>,
    /// Duration the content should have.
    pub expected_duration: Option<Duration>,
    /// Treat a missing trailing index (`moov`, finalized segment size) as
    /// truncation.
    pub require_footer: bool,
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            format: None,
            elapsed: None,
            expected_duration: None,
            require_footer: true,
        }
    }
}

impl Expectations {
    pub fn with_format(mut self, format: Container) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    pub fn allow_missing_footer(mut self) -> Self {
        self.require_footer = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Complete,
    Truncated,
    Corrupt,
    Missing,
    Empty,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Truncated => "truncated",
            Self::Corrupt => "corrupt",
            Self::Missing => "missing",
            Self::Empty => "empty",
        };
        f.write_str(s)
    }
}

/// Outcome of inspecting one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub size: u64,
    #[serde(serialize_with = "opt_secs")]
    pub duration: Option<Duration>,
    pub format: Option<Container>,
    pub message: Option<String>,
}

fn opt_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

impl VerificationReport {
    fn new(status: VerificationStatus, size: u64) -> Self {
        Self {
            status,
            size,
            duration: None,
            format: None,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == VerificationStatus::Complete
    }
}

/// Snapshot of verification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifierStats {
    pub total: u64,
    pub complete: u64,
    pub truncated: u64,
    pub corrupt: u64,
    pub missing: u64,
    pub empty: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    complete: AtomicU64,
    truncated: AtomicU64,
    corrupt: AtomicU64,
    missing: AtomicU64,
    empty: AtomicU64,
}

/// Read-only inspector that decides whether a captured file is usable.
#[derive(Debug, Default)]
pub struct FileVerifier {
    config: VerifierConfig,
    counters: Counters,
}

impl FileVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Inspect `path`. Never modifies the file.
    pub fn verify(&self, path: &Path, expect: &Expectations) -> VerificationReport {
        let report = self.inspect(path, expect);
        self.record(&report);
        debug!(
            path = %path.display(),
            status = %report.status,
            size = report.size,
            message = report.message.as_deref().unwrap_or(""),
            "Verified file"
        );
        report
    }

    /// [`verify`](Self::verify) on the blocking pool.
    pub async fn verify_async(self: &Arc<Self>, path: &Path, expect: &Expectations) -> VerificationReport {
        let this = Arc::clone(self);
        let owned_path = path.to_path_buf();
        let owned_expect = expect.clone();
        match tokio::task::spawn_blocking(move || this.verify(&owned_path, &owned_expect)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Verification task failed");
                let report = VerificationReport::new(VerificationStatus::Corrupt, 0)
                    .with_message(format!("verification task failed: {e}"));
                self.record(&report);
                report
            }
        }
    }

    pub fn stats(&self) -> VerifierStats {
        let c = &self.counters;
        VerifierStats {
            total: c.total.load(Ordering::Relaxed),
            complete: c.complete.load(Ordering::Relaxed),
            truncated: c.truncated.load(Ordering::Relaxed),
            corrupt: c.corrupt.load(Ordering::Relaxed),
            missing: c.missing.load(Ordering::Relaxed),
            empty: c.empty.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &VerificationReport) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        let bucket = match report.status {
            VerificationStatus::Complete => &c.complete,
            VerificationStatus::Truncated => &c.truncated,
            VerificationStatus::Corrupt => &c.corrupt,
            VerificationStatus::Missing => &c.missing,
            VerificationStatus::Empty => &c.empty,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn inspect(&self, path: &Path, expect: &Expectations) -> VerificationReport {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return VerificationReport::new(VerificationStatus::Missing, 0);
            }
            Err(e) => {
                return VerificationReport::new(VerificationStatus::Corrupt, 0)
                    .with_message(format!("cannot stat file: {e}"));
            }
        };

        if !metadata.is_file() {
            return VerificationReport::new(VerificationStatus::Corrupt, 0).with_message("not a regular file");
        }

        let size = metadata.len();
        if size == 0 {
            return VerificationReport::new(VerificationStatus::Empty, 0);
        }

        let mut reader = match File::open(path) {
            Ok(f) => BufReader::new(f),
            Err(e) => {
                return VerificationReport::new(VerificationStatus::Corrupt, size)
                    .with_message(format!("cannot open file: {e}"));
            }
        };

        let detected = match container::detect_container_from_reader(&mut reader) {
            Ok(found) => found,
            Err(e) => {
                return VerificationReport::new(VerificationStatus::Corrupt, size)
                    .with_message(format!("cannot read header: {e}"));
            }
        };
        let format = detected
            .or(expect.format)
            .or_else(|| container::container_from_extension(path));

        let mut report = VerificationReport::new(VerificationStatus::Corrupt, size);
        report.format = format;

        if size < self.config.min_size {
            return report.with_message(format!(
                "{size} bytes is below the {} byte minimum",
                self.config.min_size
            ));
        }

        let Some(format) = format else {
            return report.with_message("unrecognised container format");
        };

        match container::scan(format, &mut reader, size) {
            Ok(info) => report.duration = info.duration,
            Err(VerifyError::MissingIndex(msg)) if !expect.require_footer => {
                debug!(path = %path.display(), "Accepting file without index: {msg}");
            }
            Err(VerifyError::Truncated(msg)) | Err(VerifyError::MissingIndex(msg)) => {
                report.status = VerificationStatus::Truncated;
                return report.with_message(msg);
            }
            Err(VerifyError::Corrupt(msg)) => return report.with_message(msg),
            Err(VerifyError::Io(e)) => return report.with_message(format!("read failed: {e}")),
        }

        if let Some(elapsed) = expect.elapsed {
            let floor = self.config.min_bytes_per_sec as f64 * elapsed.as_secs_f64();
            if (size as f64) < floor {
                report.status = VerificationStatus::Truncated;
                return report.with_message(format!(
                    "implausibly small: {size} bytes for {:.1}s of capture",
                    elapsed.as_secs_f64()
                ));
            }
        }

        if let (Some(expected), Some(actual)) = (expect.expected_duration, report.duration) {
            let needed = expected.as_secs_f64() * self.config.duration_tolerance;
            if actual.as_secs_f64() < needed {
                report.status = VerificationStatus::Truncated;
                return report.with_message(format!(
                    "duration {:.1}s is short of the expected {:.1}s",
                    actual.as_secs_f64(),
                    expected.as_secs_f64()
                ));
            }
        }

        report.status = VerificationStatus::Complete;
        report
    }
}
