//! Shared data model for the crew daemon fleet.
//!
//! Plans, step/plan results, roles, and the workspace-wide error enum live
//! here so every other crate agrees on one vocabulary.

pub mod error;
pub mod plan;
pub mod result;
pub mod types;

pub use error::CrewError;
pub use plan::{Plan, Step};
pub use result::{OverallStatus, PlanResult, StepResult, StepStatus};
pub use types::{ExecutionMode, Role, TaskType};
