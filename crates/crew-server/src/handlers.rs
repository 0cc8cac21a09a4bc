//! Role-specific handlers that spawn subprocesses outside the plan path.

use std::io::Write as _;
use std::path::Path;

use crew_core::{OverallStatus, PlanResult, StepResult, StepStatus, TaskType};
use crew_metrics::{MetricsLog, TaskMetric};
use crew_process::{CommandSpec, Deadlines, RunOutcome};
use crew_scope::ScopeGuard;
use tracing::warn;

use crate::state::ServerState;

/// Tail kept from each command's output in the result notes.
const OUTPUT_TAIL_CHARS: usize = 500;

/// Run an ordered list of shell commands; every command gets its own step
/// result and the run stops at the first failure.
pub async fn run_tests(
    state: &ServerState,
    repo_root: &Path,
    commands: &[String],
    timeout_sec: Option<u64>,
) -> PlanResult {
    let guard = match ScopeGuard::new(repo_root) {
        Ok(guard) => guard,
        Err(e) => return PlanResult::failed("tests", e.to_string()),
    };

    let settings = state.watcher().settings();
    let max_secs = timeout_sec.unwrap_or_else(|| settings.timeout_secs(TaskType::Quick));
    let inactivity = settings.inactivity_secs(TaskType::Quick);

    let mut steps = Vec::new();
    for (index, command) in commands.iter().enumerate() {
        let spec = CommandSpec::new(
            vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()],
            guard.repo_root().to_path_buf(),
        );
        let run = crew_process::run(
            spec,
            Deadlines::new(max_secs, inactivity),
            state.shutdown_token(),
        )
        .await;

        let id = format!("test-{}", index + 1);
        let passed = matches!(run.outcome, RunOutcome::Exited { code: 0 });
        let tail = output_tail(&run.stdout, &run.stderr);
        steps.push(StepResult {
            id,
            status: if passed { StepStatus::Ok } else { StepStatus::Fail },
            summary: format!(
                "{command} -> {}",
                run.exit_code
                    .map(|c| format!("exit {c}"))
                    .unwrap_or_else(|| run.outcome.label().to_string())
            ),
            notes: tail,
            touched_paths: Vec::new(),
            error_message: None,
        });

        if !passed {
            // Remaining commands are reported as skipped failures.
            for (rest_index, rest) in commands.iter().enumerate().skip(index + 1) {
                steps.push(StepResult {
                    id: format!("test-{}", rest_index + 1),
                    status: StepStatus::Fail,
                    summary: format!("{rest} -> skipped"),
                    notes: "skipped: earlier command failed".to_string(),
                    touched_paths: Vec::new(),
                    error_message: None,
                });
            }
            break;
        }
    }

    let result = PlanResult::from_steps(steps, "");
    record_handler_metric(state, repo_root, "coder_run_tests", &result);
    result
}

/// Apply a unified diff after checking every path it names against the
/// repository scope. The diff is handed to `git apply`.
pub async fn apply_patch(
    state: &ServerState,
    repo_root: &Path,
    patch: &str,
    allow_globs: &[String],
    deny_globs: &[String],
) -> PlanResult {
    let guard = match ScopeGuard::new(repo_root) {
        Ok(guard) => guard,
        Err(e) => return PlanResult::failed("patch", e.to_string()),
    };

    let paths = patch_paths(patch);
    if paths.is_empty() {
        return PlanResult::failed("patch", "patch names no files".to_string());
    }
    for path in &paths {
        if !guard.is_valid_touched_path(path) {
            return PlanResult::failed(
                "patch",
                format!("ScopeViolation: patch path '{path}' escapes repo root"),
            );
        }
        if !guard.allowed(path, allow_globs, deny_globs) {
            return PlanResult::failed(
                "patch",
                format!("ScopeViolation: patch path '{path}' is outside the allowed scope"),
            );
        }
    }

    let patch_file = match write_patch_file(patch) {
        Ok(file) => file,
        Err(e) => return PlanResult::failed("patch", format!("failed to stage patch: {e}")),
    };

    let settings = state.watcher().settings();
    let spec = CommandSpec::new(
        vec![
            "git".to_string(),
            "apply".to_string(),
            "--verbose".to_string(),
            patch_file.path().to_string_lossy().into_owned(),
        ],
        guard.repo_root().to_path_buf(),
    );
    let run = crew_process::run(
        spec,
        Deadlines::new(
            settings.timeout_secs(TaskType::Quick),
            settings.inactivity_secs(TaskType::Quick),
        ),
        state.shutdown_token(),
    )
    .await;

    let result = match run.outcome {
        RunOutcome::Exited { code: 0 } => {
            let mut step = StepResult::ok("patch", format!("applied {} file(s)", paths.len()));
            step.touched_paths = paths;
            PlanResult::from_steps(vec![step], "")
        }
        _ => {
            let mut result = PlanResult::failed(
                "patch",
                format!("git apply failed: {}", output_tail(&run.stdout, &run.stderr)),
            );
            result.notes = run.outcome.label().to_string();
            result
        }
    };

    record_handler_metric(state, repo_root, "coder_apply_patch", &result);
    result
}

/// Paths named by `+++ b/...` / `--- a/...` headers, deduplicated.
fn patch_paths(patch: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in patch.lines() {
        let candidate = line
            .strip_prefix("+++ b/")
            .or_else(|| line.strip_prefix("--- a/"))
            .or_else(|| line.strip_prefix("+++ "))
            .or_else(|| line.strip_prefix("--- "));
        if let Some(raw) = candidate {
            let path = raw.trim();
            if path == "/dev/null" || path.is_empty() {
                continue;
            }
            let cleaned = path.to_string();
            if !paths.contains(&cleaned) {
                paths.push(cleaned);
            }
        }
    }
    paths
}

fn write_patch_file(patch: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("crew-patch-")
        .suffix(".diff")
        .tempfile()?;
    file.write_all(patch.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn output_tail(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let trimmed = source.trim();
    if trimmed.chars().nth(OUTPUT_TAIL_CHARS).is_none() {
        trimmed.to_string()
    } else {
        let tail: String = trimmed
            .chars()
            .rev()
            .take(OUTPUT_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{tail}")
    }
}

fn record_handler_metric(state: &ServerState, repo_root: &Path, tool: &str, result: &PlanResult) {
    let log = MetricsLog::for_repo(repo_root);
    let mut metric = TaskMetric::new(ulid::Ulid::new().to_string(), state.role(), repo_root);
    metric.tool = tool.to_string();
    metric.success = result.overall_status == OverallStatus::Success;
    metric.duration_sec = result.duration_ms as f64 / 1000.0;
    metric.error_message = result.error_message().map(str::to_string);
    if let Err(e) = log.record(&metric) {
        warn!(error = %e, "failed to append handler metric");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_paths_parses_git_style_headers() {
        let patch = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1 +1 @@
-old
+new
--- /dev/null
+++ b/new_file.rs
@@ -0,0 +1 @@
+hello
";
        assert_eq!(patch_paths(patch), vec!["src/lib.rs", "new_file.rs"]);
    }

    #[test]
    fn test_patch_paths_plain_headers() {
        let patch = "--- old.txt\n+++ new.txt\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(patch_paths(patch), vec!["old.txt", "new.txt"]);
    }

    #[test]
    fn test_patch_paths_empty_patch() {
        assert!(patch_paths("not a diff at all").is_empty());
    }

    #[test]
    fn test_output_tail_prefers_stderr() {
        assert_eq!(output_tail("out", "err"), "err");
        assert_eq!(output_tail("out", "  \n"), "out");
    }

    #[test]
    fn test_output_tail_truncates_from_front() {
        let long = "x".repeat(1000);
        let tail = output_tail(&long, "");
        assert!(tail.starts_with("..."));
        assert!(tail.chars().count() <= OUTPUT_TAIL_CHARS + 3);
    }
}
