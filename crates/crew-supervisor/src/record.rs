use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crew_core::Role;
use serde::{Deserialize, Serialize};

/// Persisted identity of one running daemon role.
///
/// Written only by the supervisor, read by anyone. At most one record per
/// role; a record whose PID is dead means the role is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub role: Role,
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub url: String,
}

impl DaemonRecord {
    pub fn new(role: Role, pid: u32, port: u16) -> Self {
        Self {
            role,
            pid,
            port,
            started_at: Utc::now(),
            url: format!("http://127.0.0.1:{port}/sse"),
        }
    }

    /// Read a role's record; `None` when absent or unparseable (a corrupt
    /// record is treated as "down", not as an error).
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt daemon record");
                None
            }
        }
    }

    /// Atomic write: temp file in the same directory, then rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create pid directory {}", dir.display()))?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .context("failed to create temp pid file")?;
        let payload =
            serde_json::to_vec_pretty(self).context("failed to serialize daemon record")?;
        temp.write_all(&payload)
            .context("failed to write daemon record")?;
        temp.flush().context("failed to flush daemon record")?;
        temp.persist(path)
            .with_context(|| format!("failed to move daemon record into {}", path.display()))?;
        Ok(())
    }

    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove pid file {}", path.display()))?;
        }
        Ok(())
    }
}
