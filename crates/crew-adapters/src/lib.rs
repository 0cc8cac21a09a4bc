//! Per-child-CLI adapters.
//!
//! An adapter translates a canonical [`Instruction`] into a concrete
//! [`CommandSpec`] for one coding CLI, and reads that CLI's output back.
//! The set of supported children is a closed enum (data enum pattern, no
//! dynamic dispatch); adding a child CLI means adding one variant plus an
//! entry in the basename table.
//!
//! [`Instruction`]: crew_prompt::Instruction
//! [`CommandSpec`]: crew_process::CommandSpec

mod command;
pub mod markers;
mod parse;
mod report;

pub use command::BuildContext;
pub use parse::{ParseOutcome, extract_fenced_json};
pub use report::{ChildReport, ChildStep, Usage};

use crew_config::ModelPreference;
use crew_core::TaskType;

/// Closed set of supported child CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Claude,
    Aider,
    Opencode,
    Gemini,
    Qwen,
    /// Unknown child: prompt on stdin, exit code is the only signal.
    Generic,
}

/// Basename substrings, checked in order. First hit wins.
const BASENAME_TABLE: &[(&str, Adapter)] = &[
    ("claude", Adapter::Claude),
    ("aider", Adapter::Aider),
    ("opencode", Adapter::Opencode),
    ("gemini", Adapter::Gemini),
    ("qwen", Adapter::Qwen),
];

impl Adapter {
    /// Pick the adapter for a `CODE_BIN` value (path or bare name).
    pub fn for_code_bin(code_bin: &str) -> Self {
        let basename = std::path::Path::new(code_bin)
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        BASENAME_TABLE
            .iter()
            .find(|(needle, _)| basename.contains(needle))
            .map(|(_, adapter)| *adapter)
            .unwrap_or(Adapter::Generic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Aider => "aider",
            Self::Opencode => "opencode",
            Self::Gemini => "gemini",
            Self::Qwen => "qwen",
            Self::Generic => "generic",
        }
    }

    /// Per-child wall-clock default, before config and request overrides.
    pub fn default_timeout(&self, task_type: TaskType) -> u64 {
        match (self, task_type) {
            // Aider serializes parallel plans internally; cap it tighter so
            // a wedged run does not sit out the full parallel deadline.
            (Self::Aider, TaskType::Parallel) => 900,
            _ => task_type.default_max_secs(),
        }
    }

    /// Model used when the config names none, by cost/quality preference.
    /// `None` means "let the child pick its own default".
    pub fn default_model(&self, preference: ModelPreference) -> Option<&'static str> {
        match self {
            Self::Claude => Some(match preference {
                ModelPreference::Cost => "haiku",
                ModelPreference::Quality => "sonnet",
            }),
            Self::Gemini | Self::Qwen => Some(match preference {
                ModelPreference::Cost => "gemini-2.5-flash",
                ModelPreference::Quality => "gemini-2.5-pro",
            }),
            Self::Aider | Self::Opencode | Self::Generic => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_code_bin_matches_basenames() {
        assert_eq!(Adapter::for_code_bin("claude"), Adapter::Claude);
        assert_eq!(Adapter::for_code_bin("/usr/local/bin/aider"), Adapter::Aider);
        assert_eq!(Adapter::for_code_bin("opencode"), Adapter::Opencode);
        assert_eq!(Adapter::for_code_bin("gemini"), Adapter::Gemini);
        assert_eq!(Adapter::for_code_bin("qwen-code"), Adapter::Qwen);
    }

    #[test]
    fn test_for_code_bin_substring_and_case() {
        assert_eq!(
            Adapter::for_code_bin("/opt/tools/Claude-wrapper"),
            Adapter::Claude
        );
        assert_eq!(Adapter::for_code_bin("my-aider-v2"), Adapter::Aider);
    }

    #[test]
    fn test_for_code_bin_unknown_falls_back_to_generic() {
        assert_eq!(Adapter::for_code_bin("some-new-tool"), Adapter::Generic);
        assert_eq!(Adapter::for_code_bin(""), Adapter::Generic);
    }

    #[test]
    fn test_path_component_does_not_confuse_matching() {
        // Directory names must not select an adapter; only the basename.
        assert_eq!(
            Adapter::for_code_bin("/home/claude/bin/sometool"),
            Adapter::Generic
        );
    }

    #[test]
    fn test_default_timeouts_follow_task_type() {
        assert_eq!(Adapter::Claude.default_timeout(TaskType::Quick), 300);
        assert_eq!(Adapter::Claude.default_timeout(TaskType::Parallel), 1200);
        assert_eq!(Adapter::Aider.default_timeout(TaskType::Parallel), 900);
    }

    #[test]
    fn test_default_model_preference() {
        assert_eq!(
            Adapter::Claude.default_model(ModelPreference::Quality),
            Some("sonnet")
        );
        assert_eq!(
            Adapter::Claude.default_model(ModelPreference::Cost),
            Some("haiku")
        );
        assert_eq!(Adapter::Generic.default_model(ModelPreference::Quality), None);
    }
}
