//! Role tool server over MCP.
//!
//! Two modes, identical tool behavior: a stdio JSON-RPC 2.0 loop for direct
//! embedding by a client, and an HTTP/SSE endpoint for daemonized operation
//! behind the proxy. Tool dispatch is shared; the transports are thin.

mod handlers;
mod sse;
mod state;
mod stdio;
mod tools;

pub use sse::serve_http;
pub use state::ServerState;
pub use stdio::serve_stdio;
pub use tools::{ToolError, dispatch, tool_definitions};
