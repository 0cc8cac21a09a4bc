//! Tool registry and shared dispatch.
//!
//! Tool names are stable per role; request shapes are validated against the
//! published schemas before anything executes, and schema violations are
//! the only way a tool call surfaces an MCP-level error.

use crew_core::{ExecutionMode, Role, Step};
use crew_orchestrator::ExecOptions;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::handlers;
use crate::state::ServerState;

/// One advertised tool.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Dispatch failure visible at the MCP layer.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Unknown tool name (method-not-found territory).
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Arguments did not match the published schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// The coder role's tool set. Other roles are plug-compatible and expose
/// nothing in this workspace.
pub fn tool_definitions(role: Role) -> Vec<ToolDef> {
    if role != Role::Coder {
        return Vec::new();
    }

    let step_schema = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "description": "Stable step identifier, unique within the plan"},
            "title": {"type": "string"},
            "task": {"type": "string", "description": "Natural-language task body"},
            "context_paths": {"type": "array", "items": {"type": "string"}},
            "allow_globs": {"type": "array", "items": {"type": "string"}},
            "deny_globs": {"type": "array", "items": {"type": "string"}},
            "test_plan": {"type": "array", "items": {"type": "string"}},
            "iteration_budget": {"type": "integer", "minimum": 0}
        },
        "required": ["id", "title", "task"]
    });

    vec![
        ToolDef {
            name: "coder_simple_task",
            description: "Execute a single quick coding task in the repository",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_root": {"type": "string", "description": "Absolute path to the repository root"},
                    "task": {"type": "string", "description": "What to do"},
                    "context_paths": {"type": "array", "items": {"type": "string"}},
                    "allow_globs": {"type": "array", "items": {"type": "string"}},
                    "deny_globs": {"type": "array", "items": {"type": "string"}},
                    "execution_mode": {"type": "string", "enum": ["quick", "full"]},
                    "timeout_sec": {"type": "integer", "minimum": 1}
                },
                "required": ["repo_root", "task"]
            }),
        },
        ToolDef {
            name: "coder_execute_plan_sequential",
            description: "Execute an ordered multi-step plan in one child session",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_root": {"type": "string"},
                    "steps": {"type": "array", "items": step_schema, "minItems": 1},
                    "allow_globs": {"type": "array", "items": {"type": "string"}},
                    "deny_globs": {"type": "array", "items": {"type": "string"}},
                    "execution_mode": {"type": "string", "enum": ["quick", "full"]},
                    "timeout_sec": {"type": "integer", "minimum": 1}
                },
                "required": ["repo_root", "steps"]
            }),
        },
        ToolDef {
            name: "coder_execute_plan_parallel",
            description: "Execute independent steps with a concurrency hint, in one child session",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_root": {"type": "string"},
                    "steps": {"type": "array", "items": step_schema, "minItems": 1},
                    "fanout": {"type": "integer", "minimum": 1},
                    "allow_globs": {"type": "array", "items": {"type": "string"}},
                    "deny_globs": {"type": "array", "items": {"type": "string"}},
                    "execution_mode": {"type": "string", "enum": ["quick", "full"]},
                    "timeout_sec": {"type": "integer", "minimum": 1}
                },
                "required": ["repo_root", "steps"]
            }),
        },
        ToolDef {
            name: "coder_run_tests",
            description: "Run an ordered list of shell commands and report pass/fail per command",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_root": {"type": "string"},
                    "commands": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                    "timeout_sec": {"type": "integer", "minimum": 1}
                },
                "required": ["repo_root", "commands"]
            }),
        },
        ToolDef {
            name: "coder_apply_patch",
            description: "Apply a unified diff to the repository after scope-checking its paths",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_root": {"type": "string"},
                    "patch": {"type": "string", "description": "Unified diff text"},
                    "allow_globs": {"type": "array", "items": {"type": "string"}},
                    "deny_globs": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["repo_root", "patch"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct SimpleTaskRequest {
    repo_root: String,
    task: String,
    #[serde(default)]
    context_paths: Vec<String>,
    #[serde(default)]
    allow_globs: Vec<String>,
    #[serde(default)]
    deny_globs: Vec<String>,
    #[serde(default)]
    execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SequentialPlanRequest {
    repo_root: String,
    steps: Vec<Step>,
    #[serde(default)]
    allow_globs: Vec<String>,
    #[serde(default)]
    deny_globs: Vec<String>,
    #[serde(default)]
    execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ParallelPlanRequest {
    repo_root: String,
    steps: Vec<Step>,
    #[serde(default = "default_fanout")]
    fanout: u32,
    #[serde(default)]
    allow_globs: Vec<String>,
    #[serde(default)]
    deny_globs: Vec<String>,
    #[serde(default)]
    execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

fn default_fanout() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
struct RunTestsRequest {
    repo_root: String,
    commands: Vec<String>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApplyPatchRequest {
    repo_root: String,
    patch: String,
    #[serde(default)]
    allow_globs: Vec<String>,
    #[serde(default)]
    deny_globs: Vec<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn exec_options(
    state: &ServerState,
    execution_mode: Option<ExecutionMode>,
    timeout_sec: Option<u64>,
) -> ExecOptions {
    ExecOptions {
        execution_mode: execution_mode.unwrap_or_default(),
        timeout_secs: timeout_sec,
        cancel: state.shutdown_token(),
    }
}

/// Execute one tool call. Orchestration failures come back as structured
/// result payloads, never as `Err`; only schema violations and unknown
/// names error at this layer.
pub async fn dispatch(state: &ServerState, name: &str, args: Value) -> Result<Value, ToolError> {
    match name {
        "coder_simple_task" => {
            let req: SimpleTaskRequest = parse_args(args)?;
            let options = exec_options(state, req.execution_mode, req.timeout_sec);
            let orchestrator = state.registry().orchestrator();
            let result = orchestrator
                .execute_simple(
                    std::path::Path::new(&req.repo_root),
                    &req.task,
                    req.context_paths,
                    req.allow_globs,
                    req.deny_globs,
                    options,
                )
                .await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        "coder_execute_plan_sequential" => {
            let req: SequentialPlanRequest = parse_args(args)?;
            let options = exec_options(state, req.execution_mode, req.timeout_sec);
            let orchestrator = state.registry().orchestrator();
            let result = orchestrator
                .execute_sequential(
                    std::path::Path::new(&req.repo_root),
                    req.steps,
                    req.allow_globs,
                    req.deny_globs,
                    options,
                )
                .await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        "coder_execute_plan_parallel" => {
            let req: ParallelPlanRequest = parse_args(args)?;
            let options = exec_options(state, req.execution_mode, req.timeout_sec);
            let orchestrator = state.registry().orchestrator();
            let result = orchestrator
                .execute_parallel(
                    std::path::Path::new(&req.repo_root),
                    req.steps,
                    req.fanout,
                    req.allow_globs,
                    req.deny_globs,
                    options,
                )
                .await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        "coder_run_tests" => {
            let req: RunTestsRequest = parse_args(args)?;
            let result = handlers::run_tests(
                state,
                std::path::Path::new(&req.repo_root),
                &req.commands,
                req.timeout_sec,
            )
            .await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        "coder_apply_patch" => {
            let req: ApplyPatchRequest = parse_args(args)?;
            let result = handlers::apply_patch(
                state,
                std::path::Path::new(&req.repo_root),
                &req.patch,
                &req.allow_globs,
                &req.deny_globs,
            )
            .await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coder_tool_names_are_stable() {
        let names: Vec<&str> = tool_definitions(Role::Coder)
            .iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "coder_simple_task",
                "coder_execute_plan_sequential",
                "coder_execute_plan_parallel",
                "coder_run_tests",
                "coder_apply_patch",
            ]
        );
    }

    #[test]
    fn test_non_coder_roles_expose_no_tools() {
        assert!(tool_definitions(Role::Researcher).is_empty());
        assert!(tool_definitions(Role::Prompts).is_empty());
    }

    #[test]
    fn test_schemas_declare_required_fields() {
        for def in tool_definitions(Role::Coder) {
            let required = def.input_schema["required"]
                .as_array()
                .unwrap_or_else(|| panic!("{} lacks required list", def.name));
            assert!(
                required.iter().any(|v| v == "repo_root"),
                "{} must require repo_root",
                def.name
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let state = ServerState::with_watcher(
            Role::Coder,
            std::sync::Arc::new(
                crew_config::ConfigWatcher::with_env_file(None).unwrap(),
            ),
        );
        let err = dispatch(&state, "coder_dance", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_schema_violation_is_invalid_arguments() {
        let state = ServerState::with_watcher(
            Role::Coder,
            std::sync::Arc::new(
                crew_config::ConfigWatcher::with_env_file(None).unwrap(),
            ),
        );
        // Missing required "task".
        let err = dispatch(&state, "coder_simple_task", json!({"repo_root": "/tmp"}))
            .await
            .unwrap_err();
        match err {
            ToolError::InvalidArguments(msg) => assert!(msg.contains("task")),
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_repo_root_returns_structured_failure_not_error() {
        let state = ServerState::with_watcher(
            Role::Coder,
            std::sync::Arc::new(
                crew_config::ConfigWatcher::with_env_file(None).unwrap(),
            ),
        );
        let value = dispatch(
            &state,
            "coder_simple_task",
            json!({"repo_root": "/nonexistent/repo", "task": "x"}),
        )
        .await
        .unwrap();
        assert_eq!(value["overall_status"], "failed");
    }
}
