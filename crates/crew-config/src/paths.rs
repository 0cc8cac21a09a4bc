//! XDG path layout for persistent state.
//!
//! Per-repository state lives under
//! `$XDG_CACHE_HOME/crew/<sha256(repo_abs)[:16]>-<basename>/` with `logs/`,
//! `tasks/`, and `metrics/` subtrees. Per-role PID files live under
//! `$XDG_RUNTIME_DIR/crew/` with the cache dir as fallback.

use std::path::{Path, PathBuf};

use crew_core::Role;
use sha2::{Digest, Sha256};

/// Canonical XDG app name.
pub const APP_NAME: &str = "crew";

/// `$XDG_CACHE_HOME/crew` (platform equivalent via `directories`).
pub fn cache_root() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(format!("{APP_NAME}-cache")))
}

/// Stable key for a repository: `<sha256(abs_path)[:16]>-<basename>`.
pub fn repo_key(repo_root: &Path) -> String {
    let abs = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
    let hash_prefix: String = digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect();
    let basename = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    format!("{hash_prefix}-{basename}")
}

/// Per-repository cache directory.
pub fn repo_cache_dir(repo_root: &Path) -> PathBuf {
    cache_root().join(repo_key(repo_root))
}

/// Daemon role log directory for a repository.
pub fn logs_dir(repo_root: &Path) -> PathBuf {
    repo_cache_dir(repo_root).join("logs")
}

pub fn role_log_path(repo_root: &Path, role: Role) -> PathBuf {
    logs_dir(repo_root).join(format!("{role}.log"))
}

/// Instruction audit directory for a repository.
pub fn tasks_dir(repo_root: &Path) -> PathBuf {
    repo_cache_dir(repo_root).join("tasks")
}

/// Append-only metrics CSV for a repository.
pub fn metrics_path(repo_root: &Path) -> PathBuf {
    repo_cache_dir(repo_root).join("metrics").join("tasks.csv")
}

/// PID-file directory: `$XDG_RUNTIME_DIR/crew`, else the cache root.
pub fn runtime_dir() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(root) if !root.is_empty() => PathBuf::from(root).join(APP_NAME),
        _ => cache_root(),
    }
}

pub fn pid_path(role: Role) -> PathBuf {
    runtime_dir().join(format!("{role}.pid"))
}
