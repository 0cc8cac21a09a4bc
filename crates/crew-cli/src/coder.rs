//! `crew-coder`: the coder role's MCP tool server.
//!
//! Stdio mode by default (for direct embedding by an MCP client);
//! `--http --port P` serves HTTP/SSE for daemonized operation behind the
//! proxy. Tool behavior is identical in both modes.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use crew_core::Role;
use crew_server::ServerState;

#[derive(Parser)]
#[command(name = "crew-coder", version, about = "Coder role MCP tool server")]
struct Cli {
    /// Serve HTTP/SSE instead of stdio.
    #[arg(long)]
    http: bool,
    /// Port for HTTP/SSE mode; defaults to the configured CODER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let state = Arc::new(ServerState::new(Role::Coder)?);

    if cli.http {
        let port = cli
            .port
            .unwrap_or_else(|| state.watcher().settings().port_for(Role::Coder));
        crew_server::serve_http(state, port).await
    } else {
        crew_server::serve_stdio(state).await
    }
}
