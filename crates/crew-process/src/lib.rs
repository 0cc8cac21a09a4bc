//! Subprocess driver: process-group spawning, concurrent stream capture,
//! dual deadlines, and whole-tree cleanup.
//!
//! The child runs in its own session so the entire subtree can be signalled.
//! Two deadlines run simultaneously: a hard wall-clock cap and an
//! inactivity window measured from the last byte seen on either stream.
//! Exit codes are captured but never interpreted here; classifying success
//! belongs to the adapter's parser.

mod run;
mod spec;

pub use run::{Deadlines, RunOutcome, RunResult, run};
pub use spec::CommandSpec;
