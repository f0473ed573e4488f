//! External capture tool detection.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::{ProcessError, Result};

/// Information about an external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// First line of the version output, if the tool reported one.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// # Example
///
/// ```no_run
/// use castforged_process::check_tool;
///
/// let info = check_tool("streamlink");
/// if info.available {
///     println!("streamlink version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str) -> ToolInfo {
    check_tool_with_arg(name, "--version")
}

/// Check if a tool is available using a custom version argument.
pub fn check_tool_with_arg(name: &str, version_arg: &str) -> ToolInfo {
    let path = which::which(name).ok();
    let Some(resolved) = path.as_ref() else {
        return ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        };
    };

    let version = Command::new(resolved)
        .arg(version_arg)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| {
            let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
            String::from_utf8_lossy(&text).lines().next().map(|s| s.trim().to_string())
        });

    ToolInfo {
        name: name.to_string(),
        available: true,
        version,
        path,
    }
}

/// Check every tool a recording setup may call on.
///
/// `capture_tool` is the configured downloader (usually `streamlink`); ffmpeg
/// and ffprobe are listed because capture tools shell out to them for muxing.
pub fn check_tools(capture_tool: &str) -> Vec<ToolInfo> {
    vec![
        check_tool(capture_tool),
        check_tool_with_arg("ffmpeg", "-version"),
        check_tool_with_arg("ffprobe", "-version"),
    ]
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns [`ProcessError::Spawn`] with `NotFound` if the tool is not on
/// `PATH`, the same error the engine would raise when launching it.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|e| {
        ProcessError::spawn(
            name,
            std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        )
    })
}

/// Resolve a tool, preferring a configured path over `PATH` lookup.
pub fn resolve_tool(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(tool = name, path = %path.display(), "Configured tool path does not exist, searching PATH");
    }

    require_tool(name)
}
