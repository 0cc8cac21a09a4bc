//! Per-role daemon lifecycle: singleton enforcement, zombie cleanup,
//! detached spawn, health checks.
//!
//! At most one daemon per role at any instant. The PID record plus
//! port-ownership verification close the race; foreign processes on a
//! role's port are reported, never killed.

mod ports;
mod record;
mod supervisor;

pub use ports::listener_pid_on_port;
pub use record::DaemonRecord;
pub use supervisor::{RoleStatus, Supervisor};
