use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crew_adapters::{Adapter, BuildContext, ParseOutcome, Usage};
use crew_config::Settings;
use crew_core::{
    ExecutionMode, OverallStatus, Plan, PlanResult, Role, Step, StepResult, StepStatus,
};
use crew_metrics::{MetricsLog, TaskMetric};
use crew_process::{Deadlines, RunOutcome, RunResult};
use crew_prompt::{Instruction, build_instruction};
use crew_scope::ScopeGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{self, Strategy};

/// Per-call options shared by every entry point.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub execution_mode: ExecutionMode,
    /// Request-level wall-clock override; min'd with adapter and config caps.
    pub timeout_secs: Option<u64>,
    /// External cancel (MCP session close, supervisor stop).
    pub cancel: CancellationToken,
}

/// One orchestrator, bound to a role and a (code_bin, model) pair.
///
/// Rebuilt by the registry whenever the config changes; holds no other
/// process-wide state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    role: Role,
    code_bin: String,
    model: Option<String>,
    adapter: Adapter,
    settings: Arc<Settings>,
    /// Override for metrics/audit placement (tests); defaults to the
    /// per-repo cache dir.
    state_root: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(role: Role, settings: Arc<Settings>) -> Self {
        let code_bin = settings.code_bin();
        let adapter = Adapter::for_code_bin(&code_bin);
        let model = settings
            .model_for(role)
            .or_else(|| {
                adapter
                    .default_model(settings.model_preference())
                    .map(str::to_string)
            });
        Self {
            role,
            code_bin,
            model,
            adapter,
            settings,
            state_root: None,
        }
    }

    /// Redirect metrics and audit files to `root` instead of the XDG cache.
    pub fn with_state_root(mut self, root: PathBuf) -> Self {
        self.state_root = Some(root);
        self
    }

    pub fn code_bin(&self) -> &str {
        &self.code_bin
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn adapter(&self) -> Adapter {
        self.adapter
    }

    /// Wrap a free-form task as a single-step quick plan and run it.
    pub async fn execute_simple(
        &self,
        repo_root: &Path,
        task: &str,
        context_paths: Vec<String>,
        allow_globs: Vec<String>,
        deny_globs: Vec<String>,
        options: ExecOptions,
    ) -> PlanResult {
        let mut step = Step::new("simple", "Task", task);
        step.context_paths = context_paths;
        let plan = Plan::Simple { step };
        self.execute_plan(repo_root, plan, allow_globs, deny_globs, options)
            .await
    }

    pub async fn execute_sequential(
        &self,
        repo_root: &Path,
        steps: Vec<Step>,
        allow_globs: Vec<String>,
        deny_globs: Vec<String>,
        options: ExecOptions,
    ) -> PlanResult {
        self.execute_plan(
            repo_root,
            Plan::Sequential { steps },
            allow_globs,
            deny_globs,
            options,
        )
        .await
    }

    pub async fn execute_parallel(
        &self,
        repo_root: &Path,
        steps: Vec<Step>,
        fanout: u32,
        allow_globs: Vec<String>,
        deny_globs: Vec<String>,
        options: ExecOptions,
    ) -> PlanResult {
        self.execute_plan(
            repo_root,
            Plan::Parallel { steps, fanout },
            allow_globs,
            deny_globs,
            options,
        )
        .await
    }

    /// The single execution path. Exactly one child process per call;
    /// sequential and parallel plans ride inside the instruction.
    async fn execute_plan(
        &self,
        repo_root: &Path,
        plan: Plan,
        allow_globs: Vec<String>,
        deny_globs: Vec<String>,
        options: ExecOptions,
    ) -> PlanResult {
        let task_id = ulid::Ulid::new().to_string();
        let started = Instant::now();
        let scope_globs = describe_scope(&allow_globs, &deny_globs);

        let (mut result, usage) = self
            .try_execute(repo_root, plan, allow_globs, deny_globs, &options, &task_id)
            .await;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.model_used = self.model.clone().unwrap_or_default();

        self.append_metric(
            repo_root,
            &task_id,
            options.execution_mode,
            scope_globs,
            usage,
            &result,
        );
        result
    }

    async fn try_execute(
        &self,
        repo_root: &Path,
        plan: Plan,
        allow_globs: Vec<String>,
        deny_globs: Vec<String>,
        options: &ExecOptions,
        task_id: &str,
    ) -> (PlanResult, Option<Usage>) {
        let first_step_id = plan
            .steps()
            .first()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| "simple".to_string());
        let plan_steps: Vec<Step> = plan.steps().to_vec();
        let task_type = plan.task_type();

        // 1. Scope-check everything before a single process exists.
        let guard = match ScopeGuard::new(repo_root) {
            Ok(guard) => guard,
            Err(e) => return (PlanResult::failed(first_step_id, e.to_string()), None),
        };

        let instruction = match build_instruction(
            &guard,
            plan,
            options.execution_mode,
            allow_globs,
            deny_globs,
            self.model.clone(),
        ) {
            Ok(instruction) => instruction,
            Err(e) => return (PlanResult::failed(first_step_id, e.to_string()), None),
        };

        self.write_audit(repo_root, task_id, &instruction);

        // 2. Resolve the child binary early for a clean failure message.
        if let Err(e) = which::which(&self.code_bin) {
            return (
                PlanResult::failed(first_step_id, format!("SpawnFailed: {}: {e}", self.code_bin)),
                None,
            );
        }

        // 3. Build the concrete command.
        let build_ctx = BuildContext {
            code_bin: self.code_bin.clone(),
            model: self.model.clone(),
            extra_env: self.settings.provider_env(),
        };
        let command = match self.adapter.build_command(&instruction, &build_ctx) {
            Ok(command) => command,
            Err(e) => {
                return (
                    PlanResult::failed(first_step_id, format!("adapter error: {e:#}")),
                    None,
                );
            }
        };

        // 4. One child, two deadlines.
        let max_secs = [
            options.timeout_secs.unwrap_or(u64::MAX),
            self.adapter.default_timeout(task_type),
            self.settings.timeout_secs(task_type),
        ]
        .into_iter()
        .min()
        .unwrap_or_else(|| task_type.default_max_secs());
        let deadlines = Deadlines::new(max_secs, self.settings.inactivity_secs(task_type));

        info!(
            task_id,
            adapter = self.adapter.name(),
            task_type = %task_type,
            max_secs,
            "spawning child CLI"
        );
        let run = crew_process::run(command, deadlines, options.cancel.clone()).await;

        // 5. Reconstruct a typed result whatever happened.
        let usage = self.adapter.extract_usage(&run.stdout);
        let result = self.interpret_run(&guard, &instruction, &plan_steps, run, first_step_id);
        (result, usage)
    }

    fn interpret_run(
        &self,
        guard: &ScopeGuard,
        instruction: &Instruction,
        plan_steps: &[Step],
        run: RunResult,
        first_step_id: String,
    ) -> PlanResult {
        if let RunOutcome::SpawnFailed { error } = &run.outcome {
            let mut result =
                PlanResult::failed(first_step_id, format!("SpawnFailed: {error}"));
            push_note(&mut result.notes, "SpawnFailed");
            return result;
        }

        // Auth and credit failures override everything, exit code included.
        if let Some(marker) = crew_adapters::markers::detect_failure(self.adapter, &run.stderr) {
            warn!(marker = %marker, "child reported auth/credit failure on stderr");
            let mut result = PlanResult::failed(
                first_step_id,
                parser::truncate_chars(&marker, 500),
            );
            push_note(&mut result.notes, "AdapterAuthOrCreditFailure");
            return result;
        }

        let killed = !matches!(run.outcome, RunOutcome::Exited { .. });
        let report = match self.adapter.parse(&run.stdout, &run.stderr, run.exit_code) {
            ParseOutcome::Ok(report) => report,
            ParseOutcome::LowConfidence(coarse, reason) => {
                debug!(reason, "adapter parse was low-confidence; running deep recovery");
                let (recovered, strategy) = parser::recover_report(&run.stdout);
                if strategy == Strategy::Fallback {
                    coarse
                } else {
                    recovered
                }
            }
            ParseOutcome::NoPayload(raw) => {
                let (recovered, strategy) = parser::recover_report(&raw);
                debug!(?strategy, "deep recovery on raw output");
                recovered
            }
        };

        let mut result = report.into_plan_result();
        self.normalize_steps(&mut result, plan_steps);
        self.filter_touched_paths(guard, &mut result);

        for warning in &instruction.warnings {
            push_note(&mut result.notes, warning);
        }

        if killed {
            // Best-effort aggregation of partial output: any completed step
            // keeps the run at partial, otherwise it failed.
            result.overall_status = if result
                .steps
                .iter()
                .any(|s| s.status == StepStatus::Ok)
            {
                OverallStatus::Partial
            } else {
                OverallStatus::Failed
            };
            push_note(&mut result.notes, run.outcome.label());
        }

        result
    }

    /// Every plan step must appear in the result; steps the child never
    /// reported become recoverable failures.
    fn normalize_steps(&self, result: &mut PlanResult, plan_steps: &[Step]) {
        for step in plan_steps {
            if !result.steps.iter().any(|s| s.id == step.id) {
                result.steps.push(StepResult {
                    id: step.id.clone(),
                    status: StepStatus::Fail,
                    summary: String::new(),
                    notes: "no result reported for this step".to_string(),
                    touched_paths: Vec::new(),
                    error_message: None,
                });
            }
        }
        result.overall_status = OverallStatus::from_steps(&result.steps);
    }

    /// Drop any child-reported path outside the repo root.
    fn filter_touched_paths(&self, guard: &ScopeGuard, result: &mut PlanResult) {
        for step in &mut result.steps {
            let before = step.touched_paths.len();
            step.touched_paths
                .retain(|path| guard.is_valid_touched_path(path));
            if step.touched_paths.len() < before {
                warn!(
                    step = %step.id,
                    dropped = before - step.touched_paths.len(),
                    "dropped out-of-root touched paths from child report"
                );
            }
        }
        result
            .files_modified
            .retain(|path| guard.is_valid_touched_path(path));
    }

    fn write_audit(&self, repo_root: &Path, task_id: &str, instruction: &Instruction) {
        let dir = match &self.state_root {
            Some(root) => root.join("tasks"),
            None => crew_config::paths::tasks_dir(repo_root),
        };
        let path = dir.join(format!("{task_id}.json"));
        let payload = match serde_json::to_vec_pretty(instruction) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize instruction audit");
                return;
            }
        };
        if let Err(e) =
            std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, payload))
        {
            warn!(path = %path.display(), error = %e, "failed to write instruction audit");
        }
    }

    fn append_metric(
        &self,
        repo_root: &Path,
        task_id: &str,
        execution_mode: ExecutionMode,
        scope_globs: String,
        usage: Option<Usage>,
        result: &PlanResult,
    ) {
        let log = match &self.state_root {
            Some(root) => MetricsLog::new(root.join("metrics").join("tasks.csv")),
            None => MetricsLog::for_repo(repo_root),
        };

        let mut metric = TaskMetric::new(task_id, self.role, repo_root);
        metric.tool = self.adapter.name().to_string();
        metric.model = self.model.clone().unwrap_or_default();
        metric.duration_sec = result.duration_ms as f64 / 1000.0;
        if let Some(usage) = usage {
            metric.input_tokens = usage.input_tokens;
            metric.output_tokens = usage.output_tokens;
            metric.cache_read_tokens = usage.cache_read_tokens;
            metric.cache_write_tokens = usage.cache_write_tokens;
            metric.total_cost_usd = usage.total_cost_usd;
        }
        metric.success = result.overall_status == OverallStatus::Success;
        metric.execution_mode = execution_mode;
        metric.scope_globs = scope_globs;
        metric.error_message = result
            .error_message()
            .map(|m| parser::truncate_chars(m, 500))
            .or_else(|| {
                (result.overall_status != OverallStatus::Success && !result.notes.is_empty())
                    .then(|| parser::truncate_chars(&result.notes, 500))
            });

        if let Err(e) = log.record(&metric) {
            warn!(error = %e, "failed to append task metric");
        }
    }
}

fn describe_scope(allow_globs: &[String], deny_globs: &[String]) -> String {
    let mut parts: Vec<String> = allow_globs.to_vec();
    parts.extend(deny_globs.iter().map(|g| format!("!{g}")));
    parts.join(";")
}

fn push_note(notes: &mut String, note: &str) {
    if !notes.is_empty() {
        notes.push_str("; ");
    }
    notes.push_str(note);
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
