//! Path utilities for capture outputs.
//!
//! Every retry writes to its own output path so a new attempt never appends
//! to or clobbers the bytes left behind by the previous one. The helpers here
//! derive those paths and clean up partial files between attempts.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Suffix appended to a failed attempt's file when it is kept for inspection.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Output path for the given 1-based attempt.
///
/// The first attempt uses `base` unchanged; later attempts insert
/// `.attemptN` before the extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use castforged_common::paths::attempt_output_path;
///
/// assert_eq!(attempt_output_path(Path::new("out/live.ts"), 1), Path::new("out/live.ts"));
/// assert_eq!(attempt_output_path(Path::new("out/live.ts"), 3), Path::new("out/live.attempt3.ts"));
/// assert_eq!(attempt_output_path(Path::new("out/live"), 2), Path::new("out/live.attempt2"));
/// ```
pub fn attempt_output_path(base: &Path, attempt: u32) -> PathBuf {
    if attempt <= 1 {
        return base.to_path_buf();
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match base.extension() {
        Some(ext) => format!("{}.attempt{}.{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{}.attempt{}", stem, attempt),
    };

    base.with_file_name(file_name)
}

/// Path a partial file is renamed to: `<name>.partial`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Remove a partial file. Returns `false` when there was nothing to remove.
pub fn discard_partial(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Rename a partial file to `<name>.partial`, returning the new path.
pub fn mark_partial(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(Error::not_found(path));
    }
    let target = partial_path(path);
    std::fs::rename(path, &target)?;
    Ok(target)
}
