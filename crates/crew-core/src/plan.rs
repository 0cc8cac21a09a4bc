//! Plans and steps as tagged variants.
//!
//! A plan is the request-scoped description of delegated work. It is carried
//! inside one Instruction and executed by a single child invocation.

use serde::{Deserialize, Serialize};

use crate::CrewError;
use crate::types::TaskType;

/// A single delegated unit of work with its own scope and test plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier, unique within the plan.
    pub id: String,
    /// Human title shown in prompts and results.
    pub title: String,
    /// Natural-language task body.
    pub task: String,
    /// Repo-relative paths embedded as context. Missing entries are skipped
    /// with a warning noted in the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_paths: Vec<String>,
    /// Per-step allow globs; overrides the plan-level scope when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_globs: Vec<String>,
    /// Per-step deny globs; overrides the plan-level scope when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_globs: Vec<String>,
    /// Ordered shell commands that verify the step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_plan: Vec<String>,
    /// Extra fix-up passes the child may spend on red tests. 0 = single pass.
    #[serde(default)]
    pub iteration_budget: u32,
}

impl Step {
    /// Minimal step with only id and task body; everything else defaulted.
    pub fn new(id: impl Into<String>, title: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            task: task.into(),
            context_paths: Vec::new(),
            allow_globs: Vec::new(),
            deny_globs: Vec::new(),
            test_plan: Vec::new(),
            iteration_budget: 0,
        }
    }
}

/// A sequential, parallel, or single-shot plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Plan {
    /// One implicit step wrapping a free-form task.
    Simple { step: Step },
    /// Ordered steps; step N+1 may build on the output of step N.
    Sequential { steps: Vec<Step> },
    /// Independent steps plus a concurrency hint for the child.
    Parallel { steps: Vec<Step>, fanout: u32 },
}

impl Plan {
    /// Wrap a free-form task as a single-step quick plan.
    pub fn simple(task: impl Into<String>) -> Self {
        Self::Simple {
            step: Step::new("simple", "Task", task),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Simple { .. } => TaskType::Quick,
            Self::Sequential { .. } => TaskType::Sequential,
            Self::Parallel { .. } => TaskType::Parallel,
        }
    }

    pub fn steps(&self) -> &[Step] {
        match self {
            Self::Simple { step } => std::slice::from_ref(step),
            Self::Sequential { steps } | Self::Parallel { steps, .. } => steps,
        }
    }

    /// Concurrency hint for parallel plans; 1 otherwise.
    pub fn fanout(&self) -> u32 {
        match self {
            Self::Parallel { fanout, .. } => (*fanout).max(1),
            _ => 1,
        }
    }

    /// Structural validation: at least one step, unique step IDs,
    /// no empty identifiers.
    pub fn validate(&self) -> Result<(), CrewError> {
        let steps = self.steps();
        if steps.is_empty() {
            return Err(CrewError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for step in steps {
            if step.id.trim().is_empty() {
                return Err(CrewError::InvalidPlan("step with empty id".to_string()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(CrewError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }
        Ok(())
    }
}
