//! Status classifier shared by the platform transformers.
//!
//! Maps a parsed payload onto a severity, which in turn picks the
//! accent color for Discord embeds and Teams cards.

use serde_json::{Map, Value};

/// Severity inferred from payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Failure or error state.
    Critical,
    /// Degraded but not failed.
    Warning,
    /// Healthy or recovered state.
    Good,
    /// Nothing recognizable in the payload.
    Neutral,
}

impl Severity {
    /// Accent color as a 24-bit RGB integer.
    pub fn color(self) -> u32 {
        match self {
            Self::Critical => 0xff0000,
            Self::Warning => 0xffa500,
            Self::Good => 0x00cc66,
            Self::Neutral => 0x808080,
        }
    }

    /// Accent color as a hex string, as Teams cards expect.
    pub fn theme_color(self) -> String {
        format!("{:06X}", self.color())
    }
}

fn field_text<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Classifies a payload's severity.
///
/// `QualitativeNewState` is authoritative when present; otherwise the
/// `Status` and `Severity` fields are scanned for well-known keywords.
pub fn classify(fields: &Map<String, Value>) -> Severity {
    if let Some(state) = field_text(fields, "QualitativeNewState") {
        let state = state.to_ascii_lowercase();
        if state.contains("failed") || state.contains("failure") {
            return Severity::Critical;
        }
        if state.contains("warning") || state.contains("warn") {
            return Severity::Warning;
        }
        if state.contains("normal") || state.contains("ok") {
            return Severity::Good;
        }
    }

    for key in ["Status", "Severity"] {
        if let Some(text) = field_text(fields, key) {
            let text = text.to_ascii_lowercase();
            if ["error", "failed", "critical"].iter().any(|kw| text.contains(kw)) {
                return Severity::Critical;
            }
            if text.contains("warn") {
                return Severity::Warning;
            }
            if ["ok", "success", "resolved", "normal"].iter().any(|kw| text.contains(kw)) {
                return Severity::Good;
            }
        }
    }

    Severity::Neutral
}
