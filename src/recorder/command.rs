//! A platform that runs a fixed command line.
//!
//! `{output}` anywhere in an argument is replaced with the attempt's output
//! path, so any capture tool (ffmpeg, yt-dlp, a shell script) can be
//! supervised without a dedicated platform.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use castforged_process::{ProcessRequest, ProcessResult};

use super::diagnostics::DiagnosticTable;
use super::platform::{AttemptContext, BuildError, Classification, Platform};

pub const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Clone)]
pub struct CommandPlatform {
    name: String,
    argv: Vec<String>,
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    diagnostics: DiagnosticTable,
}

impl CommandPlatform {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            name: "command".to_string(),
            argv,
            timeout: None,
            working_dir: None,
            env: BTreeMap::new(),
            diagnostics: DiagnosticTable::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticTable) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

#[async_trait]
impl Platform for CommandPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build_command(&self, ctx: &AttemptContext) -> Result<ProcessRequest, BuildError> {
        let output = ctx.output_path.to_string_lossy();
        let argv = self.argv.iter().map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output));

        let mut request = ProcessRequest::new(argv)
            .map_err(|e| BuildError::terminal(e.to_string()))?
            .with_expected_output(&ctx.output_path);
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        if let Some(dir) = &self.working_dir {
            request = request.with_working_dir(dir);
        }
        for (key, value) in &self.env {
            request = request.with_env(key, value);
        }
        Ok(request)
    }

    fn classify_failure(&self, result: &ProcessResult) -> Classification {
        self.diagnostics.classify(result)
    }
}
