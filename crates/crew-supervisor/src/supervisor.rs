use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crew_config::Settings;
use crew_core::{CrewError, Role};
use serde::Serialize;
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::ports::{listener_pid_on_port, port_accepts_connections};
use crate::record::DaemonRecord;

/// How long a freshly spawned daemon gets to reach LISTEN.
const HEALTH_CHECK_WINDOW: Duration = Duration::from_secs(5);
const HEALTH_POLL: Duration = Duration::from_millis(100);
/// TERM→KILL grace when reaping a prior incarnation.
const REAP_GRACE: Duration = Duration::from_secs(2);
/// TERM→KILL grace for `stop`.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Answer to `status(role)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RoleStatus {
    fn down() -> Self {
        Self::default()
    }

    fn running(record: &DaemonRecord) -> Self {
        Self {
            running: true,
            pid: Some(record.pid),
            port: Some(record.port),
            url: Some(record.url.clone()),
        }
    }
}

/// Per-role daemon lifecycle manager.
pub struct Supervisor {
    settings: Arc<Settings>,
    /// Repository whose cache dir receives the daemon log files.
    repo_root: PathBuf,
    /// Where PID records live; defaults to the XDG runtime dir.
    runtime_dir: PathBuf,
    /// Where role server binaries are looked up; defaults to the directory
    /// of the current executable, then PATH.
    binary_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(settings: Arc<Settings>, repo_root: PathBuf) -> Self {
        Self {
            settings,
            repo_root,
            runtime_dir: crew_config::paths::runtime_dir(),
            binary_dir: None,
        }
    }

    /// Relocate PID records (tests).
    pub fn with_runtime_dir(mut self, dir: PathBuf) -> Self {
        self.runtime_dir = dir;
        self
    }

    /// Look up role server binaries in `dir` first (tests, custom installs).
    pub fn with_binary_dir(mut self, dir: PathBuf) -> Self {
        self.binary_dir = Some(dir);
        self
    }

    pub fn pid_path(&self, role: Role) -> PathBuf {
        self.runtime_dir.join(format!("{role}.pid"))
    }

    /// Read-only view: record present, PID alive, port owned.
    pub fn status(&self, role: Role) -> RoleStatus {
        let Some(record) = DaemonRecord::read(&self.pid_path(role)) else {
            return RoleStatus::down();
        };

        if !pid_alive(record.pid) {
            debug!(role = %role, pid = record.pid, "daemon record is stale (pid dead)");
            return RoleStatus::down();
        }

        if !self.pid_owns_port(record.pid, record.port) {
            debug!(
                role = %role,
                pid = record.pid,
                port = record.port,
                "daemon pid is alive but does not own its port"
            );
            return RoleStatus::down();
        }

        RoleStatus::running(&record)
    }

    /// Map of every role's status, for `crew-daemon status` JSON output.
    pub fn status_all(&self) -> BTreeMap<String, RoleStatus> {
        Role::ALL
            .iter()
            .map(|role| (role.to_string(), self.status(*role)))
            .collect()
    }

    /// Ensure exactly one daemon for `role`. No-op when already running.
    pub async fn start(&self, role: Role) -> Result<RoleStatus, CrewError> {
        let current = self.status(role);
        if current.running {
            info!(role = %role, pid = ?current.pid, "daemon already running; start is a no-op");
            return Ok(current);
        }

        let port = self.settings.port_for(role);

        // The port may be held by a zombie of a prior incarnation; reap it.
        // Anything else on the port is foreign and untouchable.
        if let Some(holder) = listener_pid_on_port(port) {
            if is_role_incarnation(holder, role) {
                warn!(role = %role, pid = holder, "reaping prior daemon incarnation");
                terminate_pid(holder, REAP_GRACE).await;
            } else {
                return Err(CrewError::PortInUseByForeignProcess { port, pid: holder });
            }
        } else if port_accepts_connections(port) {
            // Non-Linux fallback: something is there but we cannot name it.
            return Err(CrewError::PortInUseByForeignProcess { port, pid: 0 });
        }

        DaemonRecord::remove(&self.pid_path(role)).map_err(|e| CrewError::DaemonStartFailed {
            role,
            reason: format!("stale record cleanup failed: {e:#}"),
        })?;

        let pid = self.spawn_daemon(role, port).map_err(|e| CrewError::DaemonStartFailed {
            role,
            reason: format!("{e:#}"),
        })?;

        let record = DaemonRecord::new(role, pid, port);
        record
            .write(&self.pid_path(role))
            .map_err(|e| CrewError::DaemonStartFailed {
                role,
                reason: format!("record write failed: {e:#}"),
            })?;

        // Health check: LISTEN on loopback by the new PID within the window.
        let deadline = std::time::Instant::now() + HEALTH_CHECK_WINDOW;
        loop {
            if !pid_alive(pid) {
                let _ = DaemonRecord::remove(&self.pid_path(role));
                return Err(CrewError::DaemonStartFailed {
                    role,
                    reason: format!("daemon exited during startup (pid {pid})"),
                });
            }
            if self.pid_owns_port(pid, port) {
                info!(role = %role, pid, port, "daemon is up");
                return Ok(RoleStatus::running(&record));
            }
            if std::time::Instant::now() >= deadline {
                warn!(role = %role, pid, "health check window elapsed; killing child");
                terminate_pid(pid, REAP_GRACE).await;
                let _ = DaemonRecord::remove(&self.pid_path(role));
                return Err(CrewError::DaemonStartFailed {
                    role,
                    reason: format!("port {port} never reached LISTEN within 5s"),
                });
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }
    }

    /// Stop a role's daemon. Returns false when it was not running
    /// (stopping twice is a no-op).
    pub async fn stop(&self, role: Role) -> Result<bool> {
        let path = self.pid_path(role);
        let Some(record) = DaemonRecord::read(&path) else {
            return Ok(false);
        };

        if pid_alive(record.pid) {
            info!(role = %role, pid = record.pid, "stopping daemon");
            terminate_pid(record.pid, STOP_GRACE).await;
        }

        DaemonRecord::remove(&path).context("failed to remove daemon record")?;
        Ok(true)
    }

    pub async fn restart(&self, role: Role) -> Result<RoleStatus, CrewError> {
        if let Err(e) = self.stop(role).await {
            warn!(role = %role, error = %e, "stop before restart failed");
        }
        self.start(role).await
    }

    fn pid_owns_port(&self, pid: u32, port: u16) -> bool {
        match listener_pid_on_port(port) {
            Some(owner) => owner == pid,
            // Off Linux there is no owner attribution; a live connect plus
            // a live pid is the best evidence available.
            None => !cfg!(target_os = "linux") && port_accepts_connections(port),
        }
    }

    fn resolve_binary(&self, role: Role) -> Result<PathBuf> {
        let name = role.server_binary();

        if let Some(dir) = &self.binary_dir {
            let candidate = dir.join(&name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            let candidate = dir.join(&name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        which::which(&name).with_context(|| format!("role server binary '{name}' not found"))
    }

    /// Spawn the role server detached: new session, stdio into the
    /// per-role log file under the repo cache dir.
    fn spawn_daemon(&self, role: Role, port: u16) -> Result<u32> {
        let binary = self.resolve_binary(role)?;

        let log_path = crew_config::paths::role_log_path(&self.repo_root, role);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open daemon log {}", log_path.display()))?;
        let log_clone = log_file
            .try_clone()
            .context("failed to clone daemon log handle")?;

        let mut cmd = std::process::Command::new(&binary);
        cmd.arg("--http")
            .arg("--port")
            .arg(port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(log_file)
            .stderr(log_clone);
        if let Some(env_file) = self.settings.env_file() {
            cmd.env("CREW_ENV_FILE", env_file);
        }

        // Detach from the caller's session so the daemon survives it.
        // SAFETY: setsid() is async-signal-safe and runs before exec.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", binary.display()))?;
        info!(role = %role, pid = child.id(), log = %log_path.display(), "spawned daemon");
        Ok(child.id())
    }
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: signal 0 probes for existence without delivering anything.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system.process(sysinfo::Pid::from_u32(pid)).is_some()
    }
}

/// Is `pid` a prior incarnation of `role`'s server (by executable name /
/// command line)?
fn is_role_incarnation(pid: u32, role: Role) -> bool {
    let needle = role.server_binary();
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]), true);
    let Some(process) = system.process(sysinfo::Pid::from_u32(pid)) else {
        return false;
    };

    if process.name().to_string_lossy().contains(&needle) {
        return true;
    }
    process
        .cmd()
        .iter()
        .any(|arg| arg.to_string_lossy().contains(&needle))
}

/// SIGTERM, bounded wait, then SIGKILL.
async fn terminate_pid(pid: u32, grace: Duration) {
    #[cfg(unix)]
    {
        // SAFETY: plain signal sends to a single pid.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if !pid_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!(pid, "process ignored SIGTERM; sending SIGKILL");
        unsafe {
            libc::kill(pid as i32, libc::SIGKILL);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, grace);
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
