//! The canonical structured-output contract emitted by child CLIs.
//!
//! Serde does the validation: a payload missing `overall_status` or using
//! an unknown enum value fails to deserialize and falls through to the next
//! recovery strategy.

use crew_core::{OverallStatus, PlanResult, StepResult, StepStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildReport {
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub steps: Vec<ChildStep>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Token and cost accounting surfaced by children with native JSON output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildStep {
    pub id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub touched_paths: Vec<String>,
}

impl ChildReport {
    /// Convert into a [`PlanResult`], recomputing the aggregate invariants
    /// rather than trusting the child's own `overall_status`.
    pub fn into_plan_result(self) -> PlanResult {
        let notes = self.notes.clone();
        let child_files = self.files_modified.clone();
        let steps: Vec<StepResult> = self
            .steps
            .into_iter()
            .map(|step| StepResult {
                id: step.id,
                status: step.status,
                summary: step.summary,
                notes: step.notes,
                touched_paths: step.touched_paths,
                error_message: None,
            })
            .collect();

        let mut result = PlanResult::from_steps(steps, notes);
        // The child may list files it touched outside any step entry.
        for path in child_files {
            if !result.files_modified.contains(&path) {
                result.files_modified.push(path);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_round_trips_canonical_shape() {
        let json = r#"{
            "overall_status": "partial",
            "steps": [
                {"id": "a", "status": "ok", "summary": "done", "notes": "", "touched_paths": ["x.rs"]},
                {"id": "b", "status": "fail", "summary": "tests red"}
            ],
            "files_modified": ["x.rs"],
            "notes": "one step short"
        }"#;
        let report: ChildReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.overall_status, OverallStatus::Partial);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[1].touched_paths.len(), 0);
    }

    #[test]
    fn test_missing_overall_status_is_rejected() {
        let json = r#"{"steps": [], "notes": ""}"#;
        assert!(serde_json::from_str::<ChildReport>(json).is_err());
    }

    #[test]
    fn test_enum_violation_is_rejected() {
        let json = r#"{"overall_status": "great", "steps": []}"#;
        assert!(serde_json::from_str::<ChildReport>(json).is_err());
    }

    #[test]
    fn test_into_plan_result_recomputes_status() {
        // Child claims success but one step errored; the invariant wins.
        let report = ChildReport {
            overall_status: OverallStatus::Success,
            steps: vec![
                ChildStep {
                    id: "a".into(),
                    status: StepStatus::Ok,
                    summary: String::new(),
                    notes: String::new(),
                    touched_paths: vec!["a.rs".into()],
                },
                ChildStep {
                    id: "b".into(),
                    status: StepStatus::Error,
                    summary: String::new(),
                    notes: String::new(),
                    touched_paths: vec![],
                },
            ],
            files_modified: vec!["extra.rs".into()],
            notes: "n".into(),
        };
        let result = report.into_plan_result();
        assert_eq!(result.overall_status, OverallStatus::Failed);
        assert!(result.files_modified.contains(&"a.rs".to_string()));
        assert!(result.files_modified.contains(&"extra.rs".to_string()));
        assert_eq!(result.notes, "n");
    }
}
