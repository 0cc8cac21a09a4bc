use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crew_config::Settings;
use crew_core::{CrewError, Role};

use super::Supervisor;
use crate::record::DaemonRecord;

fn settings(pairs: &[(&str, &str)]) -> Arc<Settings> {
    Arc::new(Settings::from_values(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    ))
}

fn supervisor_in(dir: &Path, pairs: &[(&str, &str)]) -> Supervisor {
    Supervisor::new(settings(pairs), dir.to_path_buf())
        .with_runtime_dir(dir.join("run"))
        .with_binary_dir(dir.join("bin"))
}

#[test]
fn test_status_without_record_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_in(dir.path(), &[]);

    let status = supervisor.status(Role::Coder);
    assert!(!status.running);
    assert_eq!(status.pid, None);
}

#[test]
fn test_status_with_dead_pid_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_in(dir.path(), &[]);

    // PID 4_000_000 is far beyond pid_max defaults; certainly dead.
    DaemonRecord::new(Role::Coder, 4_000_000, 8100)
        .write(&supervisor.pid_path(Role::Coder))
        .unwrap();

    assert!(!supervisor.status(Role::Coder).running);
}

#[cfg(target_os = "linux")]
#[test]
fn test_status_running_when_record_pid_owns_port() {
    let dir = tempfile::tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    DaemonRecord::new(Role::Coder, std::process::id(), port)
        .write(&supervisor.pid_path(Role::Coder))
        .unwrap();

    let status = supervisor.status(Role::Coder);
    assert!(status.running);
    assert_eq!(status.pid, Some(std::process::id()));
    assert_eq!(status.port, Some(port));
    assert_eq!(status.url.as_deref(), Some(&*format!("http://127.0.0.1:{port}/sse")));
}

#[cfg(target_os = "linux")]
#[test]
fn test_status_down_when_pid_alive_but_port_unowned() {
    let dir = tempfile::tempdir().unwrap();
    // Find a free port and leave it unbound.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    DaemonRecord::new(Role::Coder, std::process::id(), port)
        .write(&supervisor.pid_path(Role::Coder))
        .unwrap();

    assert!(!supervisor.status(Role::Coder).running);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_start_is_a_noop_when_already_running() {
    let dir = tempfile::tempdir().unwrap();
    // Pose as the running daemon: our record, our pid, our port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    DaemonRecord::new(Role::Coder, std::process::id(), port)
        .write(&supervisor.pid_path(Role::Coder))
        .unwrap();

    let first = supervisor.start(Role::Coder).await.unwrap();
    let second = supervisor.start(Role::Coder).await.unwrap();
    assert!(first.running && second.running);
    assert_eq!(first.pid, Some(std::process::id()));
    assert_eq!(first.pid, second.pid);
    assert_eq!(first.port, second.port);
    // The record was not rewritten or removed.
    assert_eq!(
        DaemonRecord::read(&supervisor.pid_path(Role::Coder)).unwrap().pid,
        std::process::id()
    );
}

#[tokio::test]
async fn test_stop_twice_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_in(dir.path(), &[]);

    assert!(!supervisor.stop(Role::Coder).await.unwrap());
    assert!(!supervisor.stop(Role::Coder).await.unwrap());
}

#[tokio::test]
async fn test_stop_removes_stale_record() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_in(dir.path(), &[]);

    DaemonRecord::new(Role::Coder, 4_000_000, 8100)
        .write(&supervisor.pid_path(Role::Coder))
        .unwrap();

    assert!(supervisor.stop(Role::Coder).await.unwrap());
    assert!(!supervisor.pid_path(Role::Coder).exists());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_start_refuses_foreign_process_on_port() {
    let dir = tempfile::tempdir().unwrap();
    // This test process holds the port and is no crew-coder incarnation.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    let err = supervisor.start(Role::Coder).await.unwrap_err();
    match err {
        CrewError::PortInUseByForeignProcess { port: p, pid } => {
            assert_eq!(p, port);
            assert_eq!(pid, std::process::id());
        }
        other => panic!("expected PortInUseByForeignProcess, got {other}"),
    }

    // The foreign listener is untouched.
    assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_fails_cleanly_when_daemon_never_listens() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();

    // A fake role server that parses no flags and never binds the port.
    let fake = bin_dir.join("crew-coder");
    std::fs::write(&fake, "#!/bin/sh\nsleep 600\n").unwrap();
    let mut perms = std::fs::metadata(&fake).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&fake, perms).unwrap();

    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    let started = std::time::Instant::now();
    let err = supervisor.start(Role::Coder).await.unwrap_err();

    assert!(matches!(err, CrewError::DaemonStartFailed { .. }), "got {err}");
    assert!(started.elapsed() < std::time::Duration::from_secs(15));
    // No record left behind after a failed start.
    assert!(!supervisor.pid_path(Role::Coder).exists());
}

#[tokio::test]
async fn test_start_fails_when_binary_missing() {
    let dir = tempfile::tempdir().unwrap();
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let supervisor = supervisor_in(dir.path(), &[("CODER_PORT", &port.to_string())]);
    let err = supervisor.start(Role::Coder).await.unwrap_err();
    match err {
        CrewError::DaemonStartFailed { role, reason } => {
            assert_eq!(role, Role::Coder);
            assert!(reason.contains("crew-coder"), "reason: {reason}");
        }
        other => panic!("expected DaemonStartFailed, got {other}"),
    }
}

#[test]
fn test_status_all_covers_every_role() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor_in(dir.path(), &[]);

    let map = supervisor.status_all();
    assert_eq!(map.len(), Role::ALL.len());
    for role in Role::ALL {
        assert!(map.contains_key(role.as_str()));
        assert!(!map[role.as_str()].running);
    }
}
