//! TwitCasting capture through streamlink.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use castforged_process::{OutputLine, ProcessRequest, ProcessResult};
use regex::Regex;

use super::diagnostics::DiagnosticTable;
use super::platform::{AttemptContext, BuildError, Classification, Platform, Progress};

static TWITCASTING_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?twitcasting\.tv/([A-Za-z0-9_:]{1,30})(?:/movie/(\d+))?/?$")
        .expect("constant regex pattern is valid")
});

static CAS_ST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?cas\.st/([A-Za-z0-9_:]{1,30})/?$").expect("constant regex pattern is valid")
});

static SEGMENT_DOWNLOADED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)segment (\d+).*downloaded").expect("constant regex pattern is valid")
});

/// Arguments appended to every streamlink invocation.
const STREAMLINK_RESILIENCE_ARGS: &[&str] = &[
    "--retry-streams",
    "3",
    "--retry-max",
    "3",
    "--hls-timeout",
    "60",
    "--hls-segment-timeout",
    "30",
    "--hls-segment-attempts",
    "3",
];

/// What a TwitCasting URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwitcastingTarget {
    Live { user: String },
    Movie { user: String, id: u64 },
}

impl TwitcastingTarget {
    pub fn user(&self) -> &str {
        match self {
            Self::Live { user } | Self::Movie { user, .. } => user,
        }
    }

    /// Canonical URL handed to streamlink.
    pub fn url(&self) -> String {
        match self {
            Self::Live { user } => format!("https://twitcasting.tv/{user}"),
            Self::Movie { user, id } => format!("https://twitcasting.tv/{user}/movie/{id}"),
        }
    }
}

impl fmt::Display for TwitcastingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a TwitCasting URL: {0}")]
pub struct InvalidUrl(pub String);

/// Parse a channel, movie or `cas.st` short link.
pub fn parse_url(url: &str) -> Result<TwitcastingTarget, InvalidUrl> {
    let trimmed = url.trim();

    if let Some(caps) = TWITCASTING_URL.captures(trimmed) {
        let user = caps[1].to_string();
        return match caps.get(2) {
            Some(id) => id
                .as_str()
                .parse()
                .map(|id| TwitcastingTarget::Movie { user, id })
                .map_err(|_| InvalidUrl(url.to_string())),
            None => Ok(TwitcastingTarget::Live { user }),
        };
    }

    if let Some(caps) = CAS_ST_URL.captures(trimmed) {
        return Ok(TwitcastingTarget::Live {
            user: caps[1].to_string(),
        });
    }

    Err(InvalidUrl(url.to_string()))
}

/// streamlink invocation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TwitcastingSettings {
    pub streamlink: PathBuf,
    pub quality: String,
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    /// Passed through to streamlink untouched.
    pub password: Option<String>,
}

impl Default for TwitcastingSettings {
    fn default() -> Self {
        Self {
            streamlink: PathBuf::from("streamlink"),
            quality: "best".to_string(),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(3600),
            password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwitcastingPlatform {
    url: String,
    settings: TwitcastingSettings,
    diagnostics: DiagnosticTable,
}

impl TwitcastingPlatform {
    pub fn new(url: impl Into<String>, settings: TwitcastingSettings) -> Self {
        Self {
            url: url.into(),
            settings,
            diagnostics: DiagnosticTable::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticTable) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn settings(&self) -> &TwitcastingSettings {
        &self.settings
    }
}

#[async_trait]
impl Platform for TwitcastingPlatform {
    fn name(&self) -> &str {
        "twitcasting"
    }

    async fn build_command(&self, ctx: &AttemptContext) -> Result<ProcessRequest, BuildError> {
        let target = parse_url(&self.url).map_err(|e| BuildError::terminal(e.to_string()))?;
        tracing::debug!(user = target.user(), attempt = ctx.attempt, "Building streamlink command");

        let mut argv = vec![
            self.settings.streamlink.to_string_lossy().into_owned(),
            target.url(),
            self.settings.quality.clone(),
            "--output".to_string(),
            ctx.output_path.to_string_lossy().into_owned(),
            "--force".to_string(),
        ];
        argv.extend(STREAMLINK_RESILIENCE_ARGS.iter().map(|s| s.to_string()));
        if let Some(password) = &self.settings.password {
            argv.push("--twitcasting-password".to_string());
            argv.push(password.clone());
        }
        argv.extend(self.settings.extra_args.iter().cloned());

        let request = ProcessRequest::new(argv)
            .map_err(|e| BuildError::terminal(e.to_string()))?
            .with_timeout(self.settings.timeout)
            .with_expected_output(&ctx.output_path);
        Ok(request)
    }

    fn classify_failure(&self, result: &ProcessResult) -> Classification {
        self.diagnostics.classify(result)
    }

    fn observe_line(&self, line: &OutputLine, progress: &mut Progress) {
        let text = line.text();
        if let Some(caps) = SEGMENT_DOWNLOADED.captures(text) {
            progress.segments_downloaded += 1;
            progress.last_segment = caps[1].parse().ok();
            tracing::trace!(segment = &caps[1], total = progress.segments_downloaded, "Segment downloaded");
        } else if text.contains("Available streams") {
            tracing::info!("{}", text.trim());
        } else if text.contains("Starting player") || text.contains("Opening stream") {
            progress.stream_started = true;
            tracing::info!("Stream opened");
        }
    }
}
