//! Stderr failure markers.
//!
//! Child CLIs routinely exit 0 on authentication, rate-limit, and credit
//! failures; the markers below catch those runs so they are never reported
//! as successes. Matching is case-insensitive over stderr.

use crate::Adapter;

/// Markers every child is screened against.
const COMMON_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "api key not found",
    "authentication failed",
    "rate limit",
    "too many requests",
    "429",
    "quota",
    "out of credits",
    "insufficient credit",
    "billing",
];

/// Per-child extras observed in the wild.
fn extra_markers(adapter: Adapter) -> &'static [&'static str] {
    match adapter {
        Adapter::Claude => &["credit balance is too low", "oauth token has expired"],
        Adapter::Aider => &["openai_api_key", "anthropic_api_key", "litellm"],
        Adapter::Gemini | Adapter::Qwen => &["resource_exhausted", "permission_denied"],
        Adapter::Opencode | Adapter::Generic => &[],
    }
}

const MAX_MARKER_LINE_CHARS: usize = 200;

/// Scan stderr for failure markers; returns the first offending line
/// (verbatim, truncated) when one is found.
pub fn detect_failure(adapter: Adapter, stderr: &str) -> Option<String> {
    for line in stderr.lines() {
        let lowered = line.to_ascii_lowercase();
        let hit = COMMON_MARKERS
            .iter()
            .chain(extra_markers(adapter))
            .any(|marker| lowered.contains(marker));
        if hit {
            return Some(truncate_chars(line.trim(), MAX_MARKER_LINE_CHARS));
        }
    }
    None
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().nth(max_chars).is_none() {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    }
}
