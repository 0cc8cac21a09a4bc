//! Plan orchestration: one subprocess per plan, typed results out.
//!
//! The orchestrator wires scope checks, prompt building, the adapter, the
//! subprocess driver, result recovery, and the metrics log into the three
//! tool-facing entry points. It never raises to the transport; every path
//! ends in a well-formed [`PlanResult`].
//!
//! [`PlanResult`]: crew_core::PlanResult

mod orchestrator;
pub mod parser;
mod registry;

pub use orchestrator::{ExecOptions, Orchestrator};
pub use registry::OrchestratorRegistry;
