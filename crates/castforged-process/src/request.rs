//! Description of one process to run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::{ProcessError, Result};

/// Stand-in for credential values in logged command lines.
pub const REDACTED: &str = "<redacted>";

/// Option names containing any of these carry a credential as their value.
const CREDENTIAL_MARKERS: &[&str] = &["password", "passwd", "token", "secret", "cookie", "api-key", "apikey"];

/// Immutable description of a process to run.
///
/// # Example
///
/// ```
/// use castforged_process::ProcessRequest;
/// use std::time::Duration;
///
/// let request = ProcessRequest::new(["streamlink", "https://twitcasting.tv/user", "best"])?
///     .with_timeout(Duration::from_secs(3600))
///     .with_env("STREAMLINK_NO_PLUGIN_CACHE", "1");
/// assert_eq!(request.program(), "streamlink");
/// # Ok::<(), castforged_process::ProcessError>(())
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest {
    #[serde(serialize_with = "serialize_redacted")]
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    #[serde(with = "opt_secs")]
    timeout: Option<Duration>,
    expected_output: Option<PathBuf>,
}

impl ProcessRequest {
    /// Create a request from an executable followed by its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidRequest`] if the command is empty or the
    /// executable name is blank.
    pub fn new<I, S>(command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        match command.first() {
            None => return Err(ProcessError::invalid_request("command is empty")),
            Some(program) if program.trim().is_empty() => {
                return Err(ProcessError::invalid_request("executable name is blank"))
            }
            Some(_) => {}
        }

        Ok(Self {
            command,
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
            expected_output: None,
        })
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the wall-clock limit after which the process is terminated.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Record the file the process is expected to produce.
    pub fn with_expected_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_output = Some(path.into());
        self
    }

    /// Executable name or path.
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    /// Arguments after the executable.
    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    /// Full command line.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn expected_output(&self) -> Option<&Path> {
        self.expected_output.as_deref()
    }

    /// Command line joined with spaces, for logs. Credential values are
    /// replaced with [`REDACTED`].
    pub fn display_command(&self) -> String {
        redact(&self.command).join(" ")
    }
}

fn is_credential_option(arg: &str) -> bool {
    if !arg.starts_with('-') {
        return false;
    }
    let lower = arg.to_ascii_lowercase();
    CREDENTIAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Mask the value of every credential option, in both `--opt value` and
/// `--opt=value` form.
fn redact(command: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(command.len());
    let mut hide_next = false;
    for arg in command {
        if std::mem::take(&mut hide_next) {
            out.push(REDACTED.to_string());
            continue;
        }
        match arg.split_once('=') {
            Some((option, _)) if is_credential_option(option) => out.push(format!("{option}={REDACTED}")),
            Some(_) => out.push(arg.clone()),
            None => {
                hide_next = is_credential_option(arg);
                out.push(arg.clone());
            }
        }
    }
    out
}

fn serialize_redacted<S: serde::Serializer>(command: &[String], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(redact(command))
}

mod opt_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rejects_empty_command() {
        let empty: Vec<String> = Vec::new();
        assert_matches!(ProcessRequest::new(empty), Err(ProcessError::InvalidRequest(_)));
        assert_matches!(
            ProcessRequest::new(["  ", "arg"]),
            Err(ProcessError::InvalidRequest(_))
        );
    }

    #[test]
    fn builder_sets_fields() {
        let request = ProcessRequest::new(["ffmpeg", "-i", "in.ts"])
            .unwrap()
            .with_working_dir("/tmp")
            .with_env("A", "1")
            .with_timeout(Duration::from_secs(5))
            .with_expected_output("/tmp/out.mp4");

        assert_eq!(request.program(), "ffmpeg");
        assert_eq!(request.args(), ["-i", "in.ts"]);
        assert_eq!(request.working_dir(), Some(Path::new("/tmp")));
        assert_eq!(request.env().get("A").map(String::as_str), Some("1"));
        assert_eq!(request.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(request.expected_output(), Some(Path::new("/tmp/out.mp4")));
        assert_eq!(request.display_command(), "ffmpeg -i in.ts");
    }

    #[test]
    fn display_command_hides_credentials() {
        let request = ProcessRequest::new([
            "streamlink",
            "https://twitcasting.tv/user",
            "best",
            "--twitcasting-password",
            "hunter2",
            "--http-cookie=session=abc123",
            "--api-token",
        ])
        .unwrap();

        let shown = request.display_command();
        assert_eq!(
            shown,
            "streamlink https://twitcasting.tv/user best --twitcasting-password <redacted> \
             --http-cookie=<redacted> --api-token"
        );
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("abc123"));
        // The process itself still gets the real values.
        assert_eq!(request.args()[3], "hunter2");

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("hunter2"), "{json}");
    }
}
