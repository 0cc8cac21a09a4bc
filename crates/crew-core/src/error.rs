use crate::types::Role;

#[derive(thiserror::Error, Debug)]
pub enum CrewError {
    #[error("InvalidPath: {0}")]
    InvalidPath(String),

    #[error("ScopeViolation: {0}")]
    ScopeViolation(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Failed to spawn child process: {0}")]
    SpawnFailed(String),

    #[error("Child exceeded the {limit_secs}s wall-clock limit")]
    MaxTimeout { limit_secs: u64 },

    #[error("Child produced no output for {limit_secs}s")]
    InactivityTimeout { limit_secs: u64 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Child CLI reported auth/credit failure: {0}")]
    AuthOrCreditFailure(String),

    #[error("No structured result recoverable from child output")]
    ParseFailure,

    #[error("Daemon for role '{role}' failed to start: {reason}")]
    DaemonStartFailed { role: Role, reason: String },

    #[error("Port {port} is held by unrelated process (pid {pid}); refusing to touch it")]
    PortInUseByForeignProcess { port: u16, pid: u32 },

    #[error("Daemon for role '{0}' is not running")]
    DaemonNotRunning(Role),

    #[error("Config error: {0}")]
    Config(String),
}
