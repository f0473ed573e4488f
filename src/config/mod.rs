mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::recorder::{DiagnosticRule, DiagnosticTable, RecorderSettings};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./castforged.toml",
        "./config.toml",
        "~/.config/castforged/config.toml",
        "/etc/castforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.engine.max_concurrent == 0 {
        anyhow::bail!("engine.max_concurrent must be at least 1");
    }
    if config.engine.output_cap_bytes == 0 {
        anyhow::bail!("engine.output_cap_bytes cannot be 0");
    }

    let policy = config
        .retry
        .to_policy()
        .context("Invalid [retry] section")?;
    policy.validate().context("Invalid [retry] section")?;

    let tolerance = config.verify.duration_tolerance;
    if !(tolerance > 0.0 && tolerance <= 1.0) {
        anyhow::bail!("verify.duration_tolerance must be in (0, 1], got {tolerance}");
    }

    if config.twitcasting.timeout_secs == 0 {
        anyhow::bail!("twitcasting.timeout_secs cannot be 0");
    }
    if config.twitcasting.quality.trim().is_empty() {
        anyhow::bail!("twitcasting.quality cannot be empty");
    }
    if let Some(path) = &config.twitcasting.streamlink_path {
        if !path.exists() {
            tracing::warn!("Configured streamlink path does not exist: {:?}", path);
        }
    }

    for (i, rule) in config.diagnostics.iter().enumerate() {
        DiagnosticRule::new(&rule.pattern, rule.verdict, rule.reason.as_str())
            .with_context(|| format!("Invalid pattern in diagnostics rule {} ({:?})", i + 1, rule.pattern))?;
        if rule.reason.trim().is_empty() {
            anyhow::bail!("Diagnostics rule {} has no reason", i + 1);
        }
    }

    if config.recorder.timeout_ceiling == 0 {
        tracing::warn!("recorder.timeout_ceiling is 0; the first timeout will end a recording");
    }

    Ok(())
}

impl Config {
    /// Recorder settings from the `[retry]` and `[recorder]` sections.
    pub fn recorder_settings(&self) -> Result<RecorderSettings> {
        let policy = self.retry.to_policy()?;
        Ok(RecorderSettings {
            policy,
            timeout_ceiling: self.recorder.timeout_ceiling,
            partial_file_action: self.recorder.partial_file_action,
            verify: self.recorder.verify,
            expected_duration: self.recorder.expected_duration_secs.map(Duration::from_secs),
        })
    }

    /// Configured `[[diagnostics]]` rules ahead of the built-in table.
    pub fn diagnostic_table(&self) -> Result<DiagnosticTable> {
        let rules = self
            .diagnostics
            .iter()
            .map(|rule| {
                DiagnosticRule::new(&rule.pattern, rule.verdict, rule.reason.as_str())
                    .with_context(|| format!("Invalid diagnostics pattern {:?}", rule.pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DiagnosticTable::with_overrides(rules))
    }
}
