//! Typed results reconstructed from child output.

use serde::{Deserialize, Serialize};

/// Outcome of one step.
///
/// `Fail` is recoverable (tests red, partial work); `Error` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Fail,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub touched_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepResult {
    pub fn ok(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StepStatus::Ok,
            summary: summary.into(),
            notes: String::new(),
            touched_paths: Vec::new(),
            error_message: None,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: id.into(),
            status: StepStatus::Error,
            summary: String::new(),
            notes: String::new(),
            touched_paths: Vec::new(),
            error_message: Some(message),
        }
    }
}

/// Aggregate verdict over all steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// success iff every step ok; failed iff any unrecoverable error;
    /// partial otherwise.
    pub fn from_steps(steps: &[StepResult]) -> Self {
        if steps.iter().any(|s| s.status == StepStatus::Error) {
            Self::Failed
        } else if steps.iter().all(|s| s.status == StepStatus::Ok) && !steps.is_empty() {
            Self::Success
        } else {
            Self::Partial
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The structured response every orchestrator entry point returns.
///
/// Tool callers always receive one of these, even on catastrophic internal
/// failure (which becomes `failed` with a diagnostic in `notes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    pub overall_status: OverallStatus,
    pub steps: Vec<StepResult>,
    /// Union of touched paths over all steps, deduplicated, insertion order.
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub model_used: String,
}

impl PlanResult {
    /// Aggregate step results, recomputing the overall status invariant and
    /// the files_modified union.
    pub fn from_steps(steps: Vec<StepResult>, notes: impl Into<String>) -> Self {
        let overall_status = OverallStatus::from_steps(&steps);
        let mut files_modified = Vec::new();
        for step in &steps {
            for path in &step.touched_paths {
                if !files_modified.contains(path) {
                    files_modified.push(path.clone());
                }
            }
        }
        Self {
            overall_status,
            steps,
            files_modified,
            notes: notes.into(),
            duration_ms: 0,
            model_used: String::new(),
        }
    }

    /// A failed result with a single synthesized error step.
    pub fn failed(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::from_steps(vec![StepResult::error(step_id, message.clone())], "");
        result.notes = message;
        result
    }

    /// First error message among the steps, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.steps
            .iter()
            .find_map(|s| s.error_message.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, status: StepStatus) -> StepResult {
        StepResult {
            id: id.to_string(),
            status,
            summary: String::new(),
            notes: String::new(),
            touched_paths: Vec::new(),
            error_message: None,
        }
    }

    #[test]
    fn test_overall_success_iff_all_ok() {
        let steps = vec![step("a", StepStatus::Ok), step("b", StepStatus::Ok)];
        assert_eq!(OverallStatus::from_steps(&steps), OverallStatus::Success);
    }

    #[test]
    fn test_overall_failed_on_any_error() {
        let steps = vec![
            step("a", StepStatus::Ok),
            step("b", StepStatus::Error),
            step("c", StepStatus::Fail),
        ];
        assert_eq!(OverallStatus::from_steps(&steps), OverallStatus::Failed);
    }

    #[test]
    fn test_overall_partial_on_fail_without_error() {
        let steps = vec![step("a", StepStatus::Ok), step("b", StepStatus::Fail)];
        assert_eq!(OverallStatus::from_steps(&steps), OverallStatus::Partial);
    }

    #[test]
    fn test_overall_empty_steps_is_partial() {
        assert_eq!(OverallStatus::from_steps(&[]), OverallStatus::Partial);
    }

    #[test]
    fn test_files_modified_union_dedupes_preserving_order() {
        let mut a = step("a", StepStatus::Ok);
        a.touched_paths = vec!["src/lib.rs".into(), "README.md".into()];
        let mut b = step("b", StepStatus::Ok);
        b.touched_paths = vec!["README.md".into(), "src/main.rs".into()];

        let result = PlanResult::from_steps(vec![a, b], "");
        assert_eq!(
            result.files_modified,
            vec!["src/lib.rs", "README.md", "src/main.rs"]
        );
    }

    #[test]
    fn test_failed_constructor_sets_error_message() {
        let result = PlanResult::failed("simple", "ScopeViolation: /etc/passwd");
        assert_eq!(result.overall_status, OverallStatus::Failed);
        assert_eq!(
            result.error_message(),
            Some("ScopeViolation: /etc/passwd")
        );
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&OverallStatus::Partial).unwrap(),
            "\"partial\""
        );
        let status: StepStatus = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(status, StepStatus::Fail);
    }
}
