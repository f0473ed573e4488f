//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a temp directory and a [`Recorder`]
//! wired to real engines with millisecond retry delays, plus helpers for
//! writing container fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castforged::recorder::{CommandPlatform, PartialFileAction, Recorder, RecorderSettings};
use castforged_process::ProcessEngine;
use castforged_retry::{RetryExecutor, RetryPolicy};
use castforged_verify::{fixtures, FileVerifier, VerifierConfig};
use tempfile::TempDir;

pub struct TestHarness {
    pub dir: TempDir,
    pub engine: Arc<ProcessEngine>,
    pub recorder: Recorder,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(settings(3))
    }

    pub fn with_settings(settings: RecorderSettings) -> Self {
        let engine = Arc::new(ProcessEngine::default());
        // Test commands finish in milliseconds; keep the data-rate floor out
        // of the way on slow machines.
        let verifier = Arc::new(FileVerifier::new(VerifierConfig {
            min_bytes_per_sec: 1,
            ..Default::default()
        }));
        let recorder = Recorder::new(engine.clone(), Arc::new(RetryExecutor::new()), verifier, settings);
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
            engine,
            recorder,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Millisecond backoff without jitter.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
        .with_jitter(0.0)
}

pub fn settings(max_attempts: u32) -> RecorderSettings {
    RecorderSettings {
        policy: fast_policy(max_attempts),
        partial_file_action: PartialFileAction::Delete,
        ..Default::default()
    }
}

/// A platform running `script` under `sh -c`.
pub fn sh(script: &str) -> CommandPlatform {
    CommandPlatform::new(vec!["sh".into(), "-c".into(), script.into()])
}

pub fn write_mp4(path: &Path, secs: u64) {
    std::fs::write(path, fixtures::mp4(Duration::from_secs(secs))).expect("failed to write fixture");
}

pub fn write_mpegts(path: &Path, secs: u64) {
    std::fs::write(path, fixtures::mpegts(Duration::from_secs(secs))).expect("failed to write fixture");
}
