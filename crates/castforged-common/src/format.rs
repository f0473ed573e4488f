//! Human-readable formatting for summaries and CLI output.

use std::time::Duration;

/// Format a byte count using binary units.
///
/// ```
/// use castforged_common::human_bytes;
///
/// assert_eq!(human_bytes(512), "512 B");
/// assert_eq!(human_bytes(1536), "1.5 KiB");
/// assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
/// ```
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a duration as `HH:MM:SS`, or `M:SS.s` when under a minute.
///
/// ```
/// use castforged_common::human_duration;
/// use std::time::Duration;
///
/// assert_eq!(human_duration(Duration::from_millis(4_250)), "0:04.2");
/// assert_eq!(human_duration(Duration::from_secs(3_725)), "01:02:05");
/// ```
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        let tenths = duration.subsec_millis() / 100;
        return format!("0:{:02}.{}", secs, tenths);
    }
    let mins = secs / 60;
    let hours = mins / 60;
    format!("{:02}:{:02}:{:02}", hours, mins % 60, secs % 60)
}
