use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Daemon role identity.
///
/// One functional daemon per role; only `coder` ships a server binary in
/// this workspace, the rest are plug-compatible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coder,
    Researcher,
    Secretary,
    Resources,
    Prompts,
}

impl Role {
    /// All roles in declaration order. Default ports follow this order.
    pub const ALL: [Role; 5] = [
        Role::Coder,
        Role::Researcher,
        Role::Secretary,
        Role::Resources,
        Role::Prompts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coder => "coder",
            Self::Researcher => "researcher",
            Self::Secretary => "secretary",
            Self::Resources => "resources",
            Self::Prompts => "prompts",
        }
    }

    /// Default loopback port when `<ROLE>_PORT` is not configured.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Coder => 8100,
            Self::Researcher => 8101,
            Self::Secretary => 8102,
            Self::Resources => 8103,
            Self::Prompts => 8104,
        }
    }

    /// Env var key fragment, e.g. `CODER` for `CODER_PORT` / `MODEL_CODER`.
    pub fn env_key(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    /// Name of the server binary that hosts this role's tool set.
    pub fn server_binary(&self) -> String {
        format!("crew-{}", self.as_str())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coder" => Ok(Self::Coder),
            "researcher" => Ok(Self::Researcher),
            "secretary" => Ok(Self::Secretary),
            "resources" => Ok(Self::Resources),
            "prompts" => Ok(Self::Prompts),
            other => Err(format!(
                "Unknown role '{}'. Valid roles: coder, researcher, secretary, resources, prompts",
                other
            )),
        }
    }
}

/// Task shape; selects timeout defaults and prompt rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Quick,
    Sequential,
    Parallel,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    /// Hard wall-clock cap in seconds when neither the request nor the
    /// config overrides it.
    pub fn default_max_secs(&self) -> u64 {
        match self {
            Self::Quick => 300,
            Self::Sequential => 900,
            Self::Parallel => 1200,
        }
    }

    /// Inactivity deadline in seconds when the config does not override it.
    ///
    /// Sequential and parallel children run post-task hooks that can stay
    /// silent for close to a minute; the 120 s floor keeps those runs alive.
    pub fn default_inactivity_secs(&self) -> u64 {
        match self {
            Self::Quick => 60,
            Self::Sequential | Self::Parallel => 120,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How thoroughly the child should work a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Quick,
    #[default]
    Full,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
