//! `crew-daemon`: supervisor CLI plus the stdio↔SSE proxy (`connect`).
//!
//! Exit codes: 0 success, 1 usage, 2 start/stop failure, 3 not-running
//! for `connect`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crew_config::Settings;
use crew_core::Role;
use crew_supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "crew-daemon", version, about = "Manage the crew daemon fleet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start role daemons (defaults to coder).
    Start {
        #[arg(value_enum)]
        roles: Vec<Role>,
    },
    /// Stop role daemons (defaults to every role).
    Stop {
        #[arg(value_enum)]
        roles: Vec<Role>,
    },
    /// Restart role daemons (defaults to coder).
    Restart {
        #[arg(value_enum)]
        roles: Vec<Role>,
    },
    /// Show daemon status; without a role, a JSON map of all roles.
    Status {
        #[arg(value_enum)]
        role: Option<Role>,
    },
    /// Bridge stdio to a running role daemon (for MCP clients).
    Connect {
        #[arg(value_enum)]
        role: Role,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = Arc::new(Settings::load()?);
    let repo_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let supervisor = Supervisor::new(settings.clone(), repo_root);

    match cli.command {
        Commands::Start { roles } => {
            let roles = if roles.is_empty() {
                vec![Role::Coder]
            } else {
                roles
            };
            let mut failures = 0;
            for role in roles {
                match supervisor.start(role).await {
                    Ok(status) => println!(
                        "{role}: running (pid {}, port {})",
                        status.pid.unwrap_or_default(),
                        status.port.unwrap_or_default()
                    ),
                    Err(e) => {
                        eprintln!("{role}: {e}");
                        failures += 1;
                    }
                }
            }
            Ok(if failures == 0 { 0 } else { 2 })
        }
        Commands::Stop { roles } => {
            let roles = if roles.is_empty() {
                Role::ALL.to_vec()
            } else {
                roles
            };
            let mut failures = 0;
            for role in roles {
                match supervisor.stop(role).await {
                    Ok(true) => println!("{role}: stopped"),
                    Ok(false) => println!("{role}: not running"),
                    Err(e) => {
                        eprintln!("{role}: {e:#}");
                        failures += 1;
                    }
                }
            }
            Ok(if failures == 0 { 0 } else { 2 })
        }
        Commands::Restart { roles } => {
            let roles = if roles.is_empty() {
                vec![Role::Coder]
            } else {
                roles
            };
            let mut failures = 0;
            for role in roles {
                match supervisor.restart(role).await {
                    Ok(status) => println!(
                        "{role}: running (pid {}, port {})",
                        status.pid.unwrap_or_default(),
                        status.port.unwrap_or_default()
                    ),
                    Err(e) => {
                        eprintln!("{role}: {e}");
                        failures += 1;
                    }
                }
            }
            Ok(if failures == 0 { 0 } else { 2 })
        }
        Commands::Status { role } => {
            match role {
                Some(role) => {
                    let status = supervisor.status(role);
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                None => {
                    let map = supervisor.status_all();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
            }
            Ok(0)
        }
        Commands::Connect { role } => {
            let status = supervisor.status(role);
            if !status.running {
                eprintln!("{role}: daemon is not running (try `crew-daemon start {role}`)");
                return Ok(3);
            }
            let port = status.port.unwrap_or_else(|| settings.port_for(role));
            crew_proxy::run_proxy(&format!("http://127.0.0.1:{port}")).await?;
            Ok(0)
        }
    }
}
