use std::fmt::Write as _;

use crew_core::{CrewError, ExecutionMode, Plan, Step, TaskType};
use crew_scope::{ContextFile, ScopeGuard};

use crate::instruction::Instruction;

/// Per-file ceiling for embedded context.
const MAX_FILE_BYTES: usize = 64 * 1024;
/// Whole-prompt ceiling for embedded context.
const MAX_TOTAL_CONTEXT_BYTES: usize = 1024 * 1024;

/// The output-format appendix every prompt ends with. The result parser
/// expects exactly this shape back.
pub const OUTPUT_CONTRACT: &str = r#"When you are completely done, print a single fenced ```json code block as the last thing on stdout, matching exactly this schema:

{ "overall_status": "success|partial|failed",
  "steps": [{ "id": "...", "status": "ok|fail|error", "summary": "...", "notes": "...", "touched_paths": ["..."] }],
  "files_modified": ["..."],
  "notes": "..." }

Every step from the plan must appear in "steps" with its original id. Use status "ok" only for fully completed steps, "fail" for recoverable problems (e.g. tests still red), and "error" for unrecoverable ones. "files_modified" is the union of all touched paths, repo-relative."#;

/// Render `plan` into a complete [`Instruction`].
///
/// Context paths are expanded through the scope guard; missing files become
/// warnings, out-of-root files fail the build before anything is spawned.
pub fn build_instruction(
    guard: &ScopeGuard,
    plan: Plan,
    execution_mode: ExecutionMode,
    allow_globs: Vec<String>,
    deny_globs: Vec<String>,
    selected_model: Option<String>,
) -> Result<Instruction, CrewError> {
    plan.validate()?;
    let task_type = plan.task_type();

    let (context_files, warnings) = collect_context(guard, &plan, &allow_globs, &deny_globs)?;

    let mut prompt = String::new();
    render_overview(&mut prompt, guard, &plan, execution_mode, task_type);
    render_scope(&mut prompt, &allow_globs, &deny_globs);
    render_steps(&mut prompt, &plan);
    render_context(&mut prompt, &context_files);
    prompt.push_str("# Output format\n\n");
    prompt.push_str(OUTPUT_CONTRACT);
    prompt.push('\n');

    Ok(Instruction {
        repo_root: guard.repo_root().to_path_buf(),
        plan,
        execution_mode,
        task_type,
        allow_globs,
        deny_globs,
        selected_model,
        context_files,
        prompt,
        warnings,
    })
}

fn collect_context(
    guard: &ScopeGuard,
    plan: &Plan,
    allow_globs: &[String],
    deny_globs: &[String],
) -> Result<(Vec<ContextFile>, Vec<String>), CrewError> {
    let mut files: Vec<ContextFile> = Vec::new();
    let mut warnings = Vec::new();
    let mut total: usize = 0;

    for step in plan.steps() {
        if step.context_paths.is_empty() {
            continue;
        }
        let allow = effective(&step.allow_globs, allow_globs);
        let deny = effective(&step.deny_globs, deny_globs);
        let outcome = guard.scan(&step.context_paths, allow, deny, None)?;
        warnings.extend(outcome.warnings());

        for mut file in outcome.files {
            if files.iter().any(|f| f.rel_path == file.rel_path) {
                continue;
            }
            if file.content.len() > MAX_FILE_BYTES {
                truncate_on_boundary(&mut file.content, MAX_FILE_BYTES);
                file.truncated = true;
            }
            if total + file.content.len() > MAX_TOTAL_CONTEXT_BYTES {
                warnings.push(format!(
                    "context file '{}' dropped: prompt context ceiling reached",
                    file.rel_path
                ));
                continue;
            }
            total += file.content.len();
            files.push(file);
        }
    }

    Ok((files, warnings))
}

fn effective<'a>(step_globs: &'a [String], plan_globs: &'a [String]) -> &'a [String] {
    if step_globs.is_empty() {
        plan_globs
    } else {
        step_globs
    }
}

fn render_overview(
    out: &mut String,
    guard: &ScopeGuard,
    plan: &Plan,
    execution_mode: ExecutionMode,
    task_type: TaskType,
) {
    let _ = writeln!(out, "# Plan overview\n");
    let _ = writeln!(out, "- repo root: {}", guard.repo_root().display());
    let _ = writeln!(out, "- task type: {task_type}");
    let _ = writeln!(out, "- execution mode: {execution_mode}");
    let _ = writeln!(out, "- steps: {}", plan.steps().len());

    match plan {
        Plan::Simple { .. } => {
            let _ = writeln!(
                out,
                "\nExecute the single task below inside the repo root. Work only within the declared scope."
            );
        }
        Plan::Sequential { .. } => {
            let _ = writeln!(
                out,
                "\nExecute the steps strictly in order. Step N+1 may reference the output of step N. If a step fails unrecoverably, halt and report the remaining steps as not ok."
            );
        }
        Plan::Parallel { fanout, .. } => {
            let _ = writeln!(
                out,
                "\nThe steps below are independent of each other. At most {} steps should run concurrently. File scopes are declared to be disjoint; if you observe a scope conflict between two steps, serialize those steps instead.",
                (*fanout).max(1)
            );
        }
    }
    out.push('\n');
}

fn render_scope(out: &mut String, allow_globs: &[String], deny_globs: &[String]) {
    if allow_globs.is_empty() && deny_globs.is_empty() {
        return;
    }
    let _ = writeln!(out, "# Scope\n");
    if !allow_globs.is_empty() {
        let _ = writeln!(out, "- you may touch only: {}", allow_globs.join(", "));
    }
    if !deny_globs.is_empty() {
        let _ = writeln!(out, "- never touch: {}", deny_globs.join(", "));
    }
    out.push('\n');
}

fn render_steps(out: &mut String, plan: &Plan) {
    match plan {
        Plan::Simple { step } => {
            let _ = writeln!(out, "# Task (id: {})\n", step.id);
            let _ = writeln!(out, "{}\n", step.task.trim_end());
            render_step_details(out, step);
        }
        Plan::Sequential { steps } | Plan::Parallel { steps, .. } => {
            for (index, step) in steps.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "## Step {}: {} (id: {})\n",
                    index + 1,
                    step.title,
                    step.id
                );
                let _ = writeln!(out, "{}\n", step.task.trim_end());
                render_step_details(out, step);
            }
        }
    }
}

fn render_step_details(out: &mut String, step: &Step) {
    if !step.context_paths.is_empty() {
        let _ = writeln!(out, "Context paths: {}", step.context_paths.join(", "));
    }
    if !step.allow_globs.is_empty() {
        let _ = writeln!(out, "Allowed scope: {}", step.allow_globs.join(", "));
    }
    if !step.deny_globs.is_empty() {
        let _ = writeln!(out, "Denied scope: {}", step.deny_globs.join(", "));
    }
    if !step.test_plan.is_empty() {
        let _ = writeln!(out, "Test plan (run in order, all must pass):");
        for (index, command) in step.test_plan.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", index + 1, command);
        }
    }
    if step.iteration_budget > 0 {
        let _ = writeln!(
            out,
            "Iteration budget: up to {} fix-up passes if tests fail.",
            step.iteration_budget
        );
    }
    out.push('\n');
}

fn render_context(out: &mut String, files: &[ContextFile]) {
    if files.is_empty() {
        return;
    }
    let _ = writeln!(out, "# Context files\n");
    for file in files {
        let marker = if file.truncated {
            " truncated=\"true\""
        } else {
            ""
        };
        let _ = writeln!(out, "<context-file path=\"{}\"{}>", file.rel_path, marker);
        out.push_str(&file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        let _ = writeln!(out, "</context-file>\n");
    }
}

fn truncate_on_boundary(content: &mut String, max_bytes: usize) {
    let cut = (0..=max_bytes)
        .rev()
        .find(|i| content.is_char_boundary(*i))
        .unwrap_or(0);
    content.truncate(cut);
}
