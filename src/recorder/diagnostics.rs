//! Ordered regex rules that turn capture tool output into a retry verdict.
//!
//! Rules are matched case-insensitively against stderr first and stdout
//! second. Within a stream the last line any rule matches decides, so the
//! tool's final complaint outranks errors it recovered from earlier; on that
//! line the first matching rule wins. Output that matches nothing is treated
//! as a retryable infrastructure failure.

use castforged_process::ProcessResult;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::platform::Classification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Retryable,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct DiagnosticRule {
    pub pattern: Regex,
    pub verdict: Verdict,
    pub reason: String,
}

impl DiagnosticRule {
    /// Compile `pattern` case-insensitively.
    pub fn new(pattern: &str, verdict: Verdict, reason: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            verdict,
            reason: reason.into(),
        })
    }

    fn classification(&self) -> Classification {
        match self.verdict {
            Verdict::Retryable => Classification::Retryable(self.reason.clone()),
            Verdict::Terminal => Classification::Terminal(self.reason.clone()),
        }
    }
}

const DEFAULT_RULES: &[(&str, Verdict, &str)] = &[
    (
        r"stream is offline|no (playable )?streams found|stream not found|\b404\b",
        Verdict::Terminal,
        "stream offline",
    ),
    (r"private|members only", Verdict::Terminal, "private stream"),
    (r"age.?restrict|adult", Verdict::Terminal, "age restricted"),
    (
        r"unauthorized|authentication|login required|\b403\b",
        Verdict::Terminal,
        "authentication required",
    ),
    (
        r"connection (reset|refused|aborted)|network|timed? ?out|unreachable|dns|socket|temporar",
        Verdict::Retryable,
        "network",
    ),
];

/// First-match-wins rule list.
#[derive(Debug, Clone)]
pub struct DiagnosticTable {
    rules: Vec<DiagnosticRule>,
}

impl Default for DiagnosticTable {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, verdict, reason)| DiagnosticRule::new(pattern, *verdict, *reason).ok())
            .collect();
        Self { rules }
    }
}

impl DiagnosticTable {
    /// A table with exactly `rules`, no defaults.
    pub fn new(rules: Vec<DiagnosticRule>) -> Self {
        Self { rules }
    }

    /// `rules` checked ahead of the default table.
    pub fn with_overrides(rules: Vec<DiagnosticRule>) -> Self {
        let mut table = Self::new(rules);
        table.rules.extend(Self::default().rules);
        table
    }

    pub fn rules(&self) -> &[DiagnosticRule] {
        &self.rules
    }

    /// The first rule matching `text`, if any.
    pub fn match_text(&self, text: &str) -> Option<&DiagnosticRule> {
        self.rules.iter().find(|rule| rule.pattern.is_match(text))
    }

    /// The rule for the last line of `text` that any rule matches.
    fn latest_match(&self, text: &str) -> Option<&DiagnosticRule> {
        let whole = self.match_text(text)?;
        let latest = text
            .split(['\n', '\r'])
            .rev()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| self.match_text(line));
        // A pattern spanning lines only matches the text as a whole.
        Some(latest.unwrap_or(whole))
    }

    /// Classify a failed process from its captured output.
    pub fn classify(&self, result: &ProcessResult) -> Classification {
        for text in [&result.stderr, &result.stdout] {
            if let Some(rule) = self.latest_match(text) {
                return rule.classification();
            }
        }

        let detail = result.last_diagnostic().unwrap_or("no output");
        Classification::Retryable(format!("{}: {detail}", result.exit))
    }
}
