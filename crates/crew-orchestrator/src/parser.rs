//! Deep result recovery from arbitrary child stdout.
//!
//! Strategies, in order: fenced ```json blocks, a balanced-brace scan for
//! the first embedded object that validates, the whole output as raw JSON,
//! and finally a free-text fallback that infers touched paths from
//! mutation verbs.

use crew_adapters::{ChildReport, ChildStep, extract_fenced_json};
use crew_core::{OverallStatus, StepStatus};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Which strategy produced the report, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fenced,
    BraceScan,
    RawJson,
    Fallback,
}

/// Upper bound on brace-scan parse attempts per output.
const MAX_BRACE_CANDIDATES: usize = 32;
/// How much raw output survives into fallback notes.
const MAX_RAW_NOTES_CHARS: usize = 2000;

/// Recover the canonical report from `stdout`. Never fails: when no JSON
/// validates, the fallback synthesizes a report from the prose.
pub fn recover_report(stdout: &str) -> (ChildReport, Strategy) {
    for block in extract_fenced_json(stdout) {
        if let Ok(report) = serde_json::from_str::<ChildReport>(&block) {
            return (report, Strategy::Fenced);
        }
    }

    if let Some(report) = brace_scan(stdout) {
        return (report, Strategy::BraceScan);
    }

    if let Ok(report) = serde_json::from_str::<ChildReport>(stdout.trim()) {
        return (report, Strategy::RawJson);
    }

    debug!("no structured JSON recoverable; synthesizing from free text");
    (fallback_report(stdout), Strategy::Fallback)
}

/// Find balanced `{...}` candidates and accept the first that validates.
fn brace_scan(text: &str) -> Option<ChildReport> {
    let bytes = text.as_bytes();
    let mut attempts = 0;
    let mut search_from = 0;

    while attempts < MAX_BRACE_CANDIDATES {
        let start = text[search_from..].find('{')? + search_from;
        match balanced_object_end(bytes, start) {
            Some(end) => {
                attempts += 1;
                let candidate = &text[start..=end];
                if let Ok(report) = serde_json::from_str::<ChildReport>(candidate) {
                    return Some(report);
                }
                search_from = start + 1;
            }
            None => {
                search_from = start + 1;
            }
        }
        if search_from >= text.len() {
            return None;
        }
    }
    None
}

/// Index of the `}` closing the object that opens at `start`, honoring
/// string literals and escapes.
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn path_verb_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:wrote|created|modified|updated|edited)\b\s*:?\s*`?([A-Za-z0-9_][A-Za-z0-9_./\-]*\.[A-Za-z0-9_]+)`?",
        )
        .expect("static regex")
    })
}

/// Free-text fallback: prose summary plus verb-inferred touched paths.
/// Partial iff at least one path was inferred, else failed.
fn fallback_report(stdout: &str) -> ChildReport {
    let mut touched: Vec<String> = Vec::new();
    for capture in path_verb_regex().captures_iter(stdout) {
        let path = capture[1].to_string();
        if !path.starts_with('/') && !touched.contains(&path) {
            touched.push(path);
        }
    }

    let overall = if touched.is_empty() {
        OverallStatus::Failed
    } else {
        OverallStatus::Partial
    };
    let step_status = if touched.is_empty() {
        StepStatus::Error
    } else {
        StepStatus::Fail
    };

    let summary = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string();

    ChildReport {
        overall_status: overall,
        steps: vec![ChildStep {
            id: "simple".to_string(),
            status: step_status,
            summary,
            notes: String::new(),
            touched_paths: touched.clone(),
        }],
        files_modified: touched,
        notes: truncate_chars(stdout.trim(), MAX_RAW_NOTES_CHARS),
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().nth(max_chars).is_none() {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    }
}
