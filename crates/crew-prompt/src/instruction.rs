use std::path::PathBuf;

use crew_core::{ExecutionMode, Plan, TaskType};
use crew_scope::ContextFile;
use serde::{Deserialize, Serialize};

/// The canonical payload handed to a CLI adapter.
///
/// Request-scoped: created per tool call, persisted once for audit under
/// `tasks/<task_id>.json`, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub repo_root: PathBuf,
    pub plan: Plan,
    pub execution_mode: ExecutionMode,
    pub task_type: TaskType,
    /// Effective plan-level scope. Steps may narrow it further.
    pub allow_globs: Vec<String>,
    pub deny_globs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    /// Context bundle embedded verbatim in the prompt.
    pub context_files: Vec<ContextFile>,
    /// Fully rendered prompt body, including context and output contract.
    pub prompt: String,
    /// Scan warnings (missing context paths, truncation) to surface in the
    /// final result's notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Instruction {
    /// Rough size guard used in tests and logging.
    pub fn prompt_bytes(&self) -> usize {
        self.prompt.len()
    }
}
