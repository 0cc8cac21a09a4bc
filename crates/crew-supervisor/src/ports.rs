//! Loopback port ownership via procfs.
//!
//! `/proc/net/tcp{,6}` yields the socket inode LISTENing on a port;
//! `/proc/<pid>/fd` tells us which process holds that inode. Off Linux the
//! check degrades to a connect probe with no owner attribution.

#[cfg(target_os = "linux")]
use std::path::Path;

#[cfg(target_os = "linux")]
const TCP_STATE_LISTEN: &str = "0A";

/// PID of the process LISTENing on `port` (loopback or wildcard), if any.
#[cfg(target_os = "linux")]
pub fn listener_pid_on_port(port: u16) -> Option<u32> {
    let inode = listen_inode_for_port(port)?;
    pid_holding_socket_inode(&inode)
}

#[cfg(not(target_os = "linux"))]
pub fn listener_pid_on_port(_port: u16) -> Option<u32> {
    None
}

/// True when something accepts connections on 127.0.0.1:`port`.
pub fn port_accepts_connections(port: u16) -> bool {
    std::net::TcpStream::connect_timeout(
        &std::net::SocketAddr::from(([127, 0, 0, 1], port)),
        std::time::Duration::from_millis(250),
    )
    .is_ok()
}

#[cfg(target_os = "linux")]
fn listen_inode_for_port(port: u16) -> Option<String> {
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        if let Some(inode) = find_listen_inode(&content, port) {
            return Some(inode);
        }
    }
    None
}

/// Parse one tcp table. Format per line:
/// `sl local_address rem_address st ... inode ...`
/// with `local_address` as HEXADDR:HEXPORT and `st` 0A for LISTEN.
#[cfg(target_os = "linux")]
fn find_listen_inode(table: &str, port: u16) -> Option<String> {
    let wanted = format!("{port:04X}");
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let local = fields[1];
        let state = fields[3];
        if state != TCP_STATE_LISTEN {
            continue;
        }
        let Some((_addr, hex_port)) = local.rsplit_once(':') else {
            continue;
        };
        if hex_port == wanted {
            return Some(fields[9].to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn pid_holding_socket_inode(inode: &str) -> Option<u32> {
    let target = format!("socket:[{inode}]");
    let proc_root = Path::new("/proc");

    for entry in std::fs::read_dir(proc_root).ok()?.flatten() {
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path())
                && link.to_string_lossy() == target
            {
                return Some(pid);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_port_has_no_listener() {
        // Bind-then-drop to find a port that is certainly free.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!port_accepts_connections(port));
        #[cfg(target_os = "linux")]
        assert_eq!(listener_pid_on_port(port), None);
    }

    #[test]
    fn test_own_listener_is_detected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(port_accepts_connections(port));
        #[cfg(target_os = "linux")]
        assert_eq!(listener_pid_on_port(port), Some(std::process::id()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_find_listen_inode_parses_table() {
        let table = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1FA4 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 123456 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1FA5 00000000:0000 01 00000000:00000000 00:00000000 00000000  1000        0 654321 1 0000000000000000 100 0 0 10 0
";
        // 0x1FA4 = 8100, LISTEN; 0x1FA5 = 8101 but ESTABLISHED.
        assert_eq!(find_listen_inode(table, 8100), Some("123456".to_string()));
        assert_eq!(find_listen_inode(table, 8101), None);
        assert_eq!(find_listen_inode(table, 9000), None);
    }
}
