//! Adapter-side output parsing.
//!
//! Parsing is data, not control flow: the adapter returns a three-state
//! [`ParseOutcome`] and the orchestrator decides whether the deep recovery
//! parser needs to run. No exceptions for "use fallback".

use crew_core::{OverallStatus, StepStatus};
use serde::Deserialize;
use tracing::debug;

use crate::Adapter;
use crate::report::{ChildReport, ChildStep, Usage};

/// What the adapter made of a child's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A canonical report was recovered and validated.
    Ok(ChildReport),
    /// Only a coarse report could be synthesized; the reason says why.
    LowConfidence(ChildReport, String),
    /// Nothing usable; the raw stdout rides along for deep recovery.
    NoPayload(String),
}

/// Claude's `--output-format json` envelope. Only the fields we read;
/// `type` and `result` are required so arbitrary JSON objects (like a raw
/// canonical report) are not mistaken for an envelope.
#[derive(Debug, Deserialize)]
struct ClaudeEnvelope {
    #[serde(rename = "type")]
    kind: String,
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

impl Adapter {
    /// Interpret a finished run's streams.
    ///
    /// Exit code alone never yields [`ParseOutcome::Ok`]; a validated
    /// canonical JSON block is the only path to full confidence.
    pub fn parse(&self, stdout: &str, _stderr: &str, exit_code: Option<i32>) -> ParseOutcome {
        // Claude wraps the assistant text (and our fenced report with it)
        // in a provider-native envelope; unwrap it first.
        let unwrapped;
        let effective: &str = match self.native_envelope(stdout) {
            Some(envelope) if envelope.is_error => {
                return ParseOutcome::LowConfidence(
                    coarse_report(OverallStatus::Failed, StepStatus::Error, &envelope.result),
                    "provider envelope flagged is_error".to_string(),
                );
            }
            Some(envelope) => {
                unwrapped = envelope.result;
                &unwrapped
            }
            None => stdout,
        };

        if !matches!(self, Adapter::Generic) {
            for block in extract_fenced_json(effective) {
                match serde_json::from_str::<ChildReport>(&block) {
                    Ok(report) => {
                        debug!(adapter = self.name(), "recovered canonical report from fence");
                        return ParseOutcome::Ok(report);
                    }
                    Err(e) => {
                        debug!(adapter = self.name(), error = %e, "fenced block did not validate");
                    }
                }
            }
        }

        if effective.trim().is_empty() {
            return ParseOutcome::NoPayload(String::new());
        }

        match exit_code {
            Some(0) => ParseOutcome::LowConfidence(
                coarse_report(OverallStatus::Partial, StepStatus::Fail, effective),
                "exit 0 but no canonical JSON block".to_string(),
            ),
            Some(code) => ParseOutcome::LowConfidence(
                coarse_report(OverallStatus::Failed, StepStatus::Error, effective),
                format!("exit {code} and no canonical JSON block"),
            ),
            None => ParseOutcome::NoPayload(effective.to_string()),
        }
    }

    /// Token/cost accounting from provider-native output, when the child
    /// emits it. Only claude does today.
    pub fn extract_usage(&self, stdout: &str) -> Option<Usage> {
        let envelope = self.native_envelope(stdout)?;
        Some(Usage {
            input_tokens: envelope.usage.input_tokens,
            output_tokens: envelope.usage.output_tokens,
            cache_read_tokens: envelope.usage.cache_read_input_tokens,
            cache_write_tokens: envelope.usage.cache_creation_input_tokens,
            total_cost_usd: envelope.total_cost_usd,
        })
    }

    fn native_envelope(&self, stdout: &str) -> Option<ClaudeEnvelope> {
        if !matches!(self, Adapter::Claude) {
            return None;
        }
        serde_json::from_str::<ClaudeEnvelope>(stdout.trim())
            .ok()
            .filter(|envelope| envelope.kind == "result")
    }
}

fn coarse_report(overall: OverallStatus, step_status: StepStatus, stdout: &str) -> ChildReport {
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
            touched_paths: Vec::new(),
        }],
        files_modified: Vec::new(),
        notes: String::new(),
    }
}

/// All ```json fenced blocks in declaration order.
///
/// Shared with the deep recovery parser so both layers agree on what a
/// fence is.
pub fn extract_fenced_json(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = find_fence_open(rest) {
        let after_open = &rest[open.content_start..];
        let Some(close) = after_open.find("\n```") else {
            break;
        };
        blocks.push(after_open[..close].trim().to_string());
        rest = &after_open[close + 4..];
    }

    blocks
}

struct FenceOpen {
    content_start: usize,
}

fn find_fence_open(text: &str) -> Option<FenceOpen> {
    let mut search_from = 0;
    loop {
        let idx = text[search_from..].find("```json")?;
        let absolute = search_from + idx;
        // A fence opens at line start only.
        if absolute == 0 || text.as_bytes()[absolute - 1] == b'\n' {
            let tail = &text[absolute + "```json".len()..];
            let newline = tail.find('\n')?;
            return Some(FenceOpen {
                content_start: absolute + "```json".len() + newline + 1,
            });
        }
        search_from = absolute + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = r#"{
  "overall_status": "success",
  "steps": [{"id": "simple", "status": "ok", "summary": "wrote hello.py", "notes": "", "touched_paths": ["hello.py"]}],
  "files_modified": ["hello.py"],
  "notes": ""
}"#;

    fn fenced(payload: &str) -> String {
        format!("some chatter\n```json\n{payload}\n```\ntrailing notes\n")
    }

    #[test]
    fn test_valid_fence_is_full_confidence() {
        let outcome = Adapter::Claude.parse(&fenced(CANONICAL), "", Some(0));
        match outcome {
            ParseOutcome::Ok(report) => {
                assert_eq!(report.overall_status, OverallStatus::Success);
                assert_eq!(report.steps[0].touched_paths, vec!["hello.py"]);
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn test_exit_zero_alone_is_not_success() {
        let outcome = Adapter::Claude.parse("did some things\nall done\n", "", Some(0));
        match outcome {
            ParseOutcome::LowConfidence(report, reason) => {
                assert_eq!(report.overall_status, OverallStatus::Partial);
                assert_eq!(report.steps[0].summary, "all done");
                assert!(reason.contains("no canonical JSON"));
            }
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn test_nonzero_exit_without_json_is_low_confidence_failure() {
        let outcome = Adapter::Gemini.parse("boom\n", "", Some(2));
        match outcome {
            ParseOutcome::LowConfidence(report, reason) => {
                assert_eq!(report.overall_status, OverallStatus::Failed);
                assert!(reason.contains("exit 2"));
            }
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_stdout_is_no_payload() {
        assert_eq!(
            Adapter::Claude.parse("  \n", "", Some(0)),
            ParseOutcome::NoPayload(String::new())
        );
    }

    #[test]
    fn test_signal_killed_run_is_no_payload_with_raw() {
        let outcome = Adapter::Claude.parse("partial work...", "", None);
        assert_eq!(
            outcome,
            ParseOutcome::NoPayload("partial work...".to_string())
        );
    }

    #[test]
    fn test_generic_adapter_never_reads_fences() {
        let outcome = Adapter::Generic.parse(&fenced(CANONICAL), "", Some(0));
        assert!(matches!(outcome, ParseOutcome::LowConfidence(_, _)));
    }

    #[test]
    fn test_invalid_fence_falls_through_to_next() {
        let text = format!(
            "```json\n{{\"overall_status\": \"bogus\"}}\n```\n```json\n{CANONICAL}\n```\n"
        );
        let outcome = Adapter::Claude.parse(&text, "", Some(0));
        assert!(matches!(outcome, ParseOutcome::Ok(_)));
    }

    fn claude_envelope(result_text: &str, is_error: bool) -> String {
        serde_json::json!({
            "type": "result",
            "subtype": if is_error { "error" } else { "success" },
            "is_error": is_error,
            "result": result_text,
            "session_id": "s-1",
            "total_cost_usd": 0.0042,
            "usage": {
                "input_tokens": 1200,
                "output_tokens": 340,
                "cache_read_input_tokens": 800,
                "cache_creation_input_tokens": 55
            }
        })
        .to_string()
    }

    #[test]
    fn test_claude_envelope_is_unwrapped_before_fence_scan() {
        let inner = format!("all done\n```json\n{CANONICAL}\n```\n");
        let stdout = claude_envelope(&inner, false);
        let outcome = Adapter::Claude.parse(&stdout, "", Some(0));
        match outcome {
            ParseOutcome::Ok(report) => {
                assert_eq!(report.overall_status, OverallStatus::Success)
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn test_claude_envelope_error_flag_is_low_confidence_failure() {
        let stdout = claude_envelope("Execution error", true);
        let outcome = Adapter::Claude.parse(&stdout, "", Some(0));
        match outcome {
            ParseOutcome::LowConfidence(report, reason) => {
                assert_eq!(report.overall_status, OverallStatus::Failed);
                assert!(reason.contains("is_error"));
            }
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn test_claude_usage_extraction() {
        let stdout = claude_envelope("text", false);
        let usage = Adapter::Claude.extract_usage(&stdout).unwrap();
        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.output_tokens, 340);
        assert_eq!(usage.cache_read_tokens, 800);
        assert_eq!(usage.cache_write_tokens, 55);
        assert!((usage.total_cost_usd - 0.0042).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usage_absent_for_other_adapters_and_plain_output() {
        let stdout = claude_envelope("text", false);
        assert!(Adapter::Gemini.extract_usage(&stdout).is_none());
        assert!(Adapter::Claude.extract_usage("plain text output").is_none());
    }

    #[test]
    fn test_raw_canonical_object_is_not_mistaken_for_an_envelope() {
        // A whole-output canonical report has no "type"/"result" fields and
        // must go through the normal fence/low-confidence path untouched.
        let outcome = Adapter::Claude.parse(CANONICAL, "", Some(0));
        assert!(
            !matches!(outcome, ParseOutcome::NoPayload(_)),
            "raw canonical output was swallowed: {outcome:?}"
        );
    }

    #[test]
    fn test_claude_plain_output_still_parses() {
        // Older claude builds (or piped runs) may print plain text.
        let text = format!("chatter\n```json\n{CANONICAL}\n```\n");
        let outcome = Adapter::Claude.parse(&text, "", Some(0));
        assert!(matches!(outcome, ParseOutcome::Ok(_)));
    }

    #[test]
    fn test_extract_fenced_json_orders_blocks() {
        let text = "```json\n{\"a\":1}\n```\nmiddle\n```json\n{\"b\":2}\n```\n";
        let blocks = extract_fenced_json(text);
        assert_eq!(blocks, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_unclosed_fence_is_ignored() {
        let blocks = extract_fenced_json("```json\n{\"a\":1}\nno close");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_inline_backticks_are_not_fences() {
        let blocks = extract_fenced_json("see ```json inline``` text\n");
        assert!(blocks.is_empty());
    }
}
