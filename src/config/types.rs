use std::path::PathBuf;
use std::time::Duration;

use castforged_process::{EngineConfig, DEFAULT_OUTPUT_CAP};
use castforged_retry::{BackoffStrategy, RetryPolicy};
use castforged_verify::VerifierConfig;
use serde::{Deserialize, Serialize};

use crate::recorder::{PartialFileAction, TwitcastingSettings, Verdict};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub verify: VerifierConfig,

    #[serde(default)]
    pub recorder: RecorderSection,

    #[serde(default)]
    pub twitcasting: TwitcastingConfig,

    /// Extra classification rules, checked before the built-in table.
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    /// Bytes of stdout and stderr kept per process
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,

    /// Seconds between SIGTERM and SIGKILL
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Seconds to wait for the process to disappear after SIGKILL
    #[serde(default = "default_kill_wait")]
    pub kill_wait_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_output_cap() -> usize {
    DEFAULT_OUTPUT_CAP
}
fn default_grace_period() -> u64 {
    5
}
fn default_kill_wait() -> u64 {
    3
}
fn default_max_concurrent() -> usize {
    5
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            output_cap_bytes: default_output_cap(),
            grace_period_secs: default_grace_period(),
            kill_wait_secs: default_kill_wait(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_cap: self.output_cap_bytes,
            grace_period: Duration::from_secs(self.grace_period_secs),
            kill_wait: Duration::from_secs(self.kill_wait_secs),
            max_concurrent: self.max_concurrent,
        }
    }
}

/// A named preset with optional per-field overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub base_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_delay_secs: Option<u64>,

    #[serde(default)]
    pub multiplier: Option<f64>,

    #[serde(default)]
    pub jitter: Option<f64>,

    #[serde(default)]
    pub strategy: Option<BackoffStrategy>,

    /// Overall budget for all attempts of one recording
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

fn default_preset() -> String {
    "recording".to_string()
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            max_attempts: None,
            base_delay_ms: None,
            max_delay_secs: None,
            multiplier: None,
            jitter: None,
            strategy: None,
            deadline_secs: None,
        }
    }
}

impl RetrySection {
    /// Resolve the preset and apply overrides. Does not validate bounds.
    pub fn to_policy(&self) -> Result<RetryPolicy, castforged_retry::PolicyError> {
        let mut policy = RetryPolicy::preset(&self.preset)?;
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.max_delay_secs {
            policy.max_delay = Duration::from_secs(secs);
        }
        if let Some(m) = self.multiplier {
            policy.multiplier = m;
        }
        if let Some(j) = self.jitter {
            policy.jitter = j;
        }
        if let Some(s) = self.strategy {
            policy.strategy = s;
        }
        if let Some(secs) = self.deadline_secs {
            policy.deadline = Some(Duration::from_secs(secs));
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSection {
    /// Timeouts retried before a timeout ends the recording
    #[serde(default = "default_timeout_ceiling")]
    pub timeout_ceiling: u32,

    #[serde(default)]
    pub partial_file_action: PartialFileAction,

    #[serde(default = "default_verify")]
    pub verify: bool,

    #[serde(default)]
    pub expected_duration_secs: Option<u64>,

    /// Directory for per-recording JSON result logs
    #[serde(default)]
    pub result_log_dir: Option<PathBuf>,
}

fn default_timeout_ceiling() -> u32 {
    2
}
fn default_verify() -> bool {
    true
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            timeout_ceiling: default_timeout_ceiling(),
            partial_file_action: PartialFileAction::default(),
            verify: default_verify(),
            expected_duration_secs: None,
            result_log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitcastingConfig {
    /// Path to streamlink (searched on PATH when unset)
    #[serde(default)]
    pub streamlink_path: Option<PathBuf>,

    #[serde(default = "default_quality")]
    pub quality: String,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,

    /// Password for protected lives, passed to streamlink as-is
    #[serde(default)]
    pub password: Option<String>,
}

fn default_quality() -> String {
    "best".to_string()
}
fn default_capture_timeout() -> u64 {
    3600
}

impl Default for TwitcastingConfig {
    fn default() -> Self {
        Self {
            streamlink_path: None,
            quality: default_quality(),
            extra_args: Vec::new(),
            timeout_secs: default_capture_timeout(),
            password: None,
        }
    }
}

impl TwitcastingConfig {
    /// Settings with streamlink resolved to `streamlink`.
    pub fn to_settings(&self, streamlink: PathBuf) -> TwitcastingSettings {
        TwitcastingSettings {
            streamlink,
            quality: self.quality.clone(),
            extra_args: self.extra_args.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticRuleConfig {
    pub pattern: String,
    pub verdict: Verdict,
    pub reason: String,
}
