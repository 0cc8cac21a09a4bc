use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything needed to launch one child invocation.
///
/// Built by a CLI adapter, consumed by [`crate::run`]. The prompt may travel
/// as an argv element, as `stdin_bytes`, or as a temp file referenced from
/// `argv`; the driver does not care which.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program plus arguments; `argv[0]` is the executable.
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment on top of the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Environment variables removed from the child (recursion guards etc.).
    #[serde(default)]
    pub env_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_bytes: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            argv,
            cwd,
            env: HashMap::new(),
            env_remove: Vec::new(),
            stdin_bytes: None,
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Single-line rendering for logs; stdin payload elided.
    pub fn display_line(&self) -> String {
        self.argv.join(" ")
    }
}
