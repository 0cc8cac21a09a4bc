//! HTTP/SSE transport for daemonized operation.
//!
//! `GET /sse` opens the event stream (first event names the per-session
//! POST endpoint), `POST /message` carries JSON-RPC frames in. The daemon
//! supervisor keeps this process alive; proxies are the ephemeral side.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::transport::{SseServer, sse_server::SseServerConfig};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::state::ServerState;
use crate::tools::{ToolDef, ToolError, dispatch, tool_definitions};

const SSE_PATH: &str = "/sse";
const SSE_POST_PATH: &str = "/message";

/// Serve the role's tool set on `127.0.0.1:<port>` until ctrl-c or the
/// server state's shutdown token fires.
pub async fn serve_http(state: Arc<ServerState>, port: u16) -> Result<()> {
    let bind: SocketAddr = (std::net::Ipv4Addr::LOCALHOST, port).into();
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve local address")?;

    let transport_ct = CancellationToken::new();
    let (sse_server, sse_router) = SseServer::new(SseServerConfig {
        bind: local_addr,
        sse_path: SSE_PATH.to_string(),
        post_path: SSE_POST_PATH.to_string(),
        ct: transport_ct.clone(),
        sse_keep_alive: None,
    });

    let handler_state = state.clone();
    let _service_ct = sse_server.with_service_directly(move || CrewToolServer {
        state: handler_state.clone(),
    });

    info!(
        role = %state.role(),
        url = %format!("http://{local_addr}{SSE_PATH}"),
        "MCP SSE server listening"
    );

    let shutdown = state.shutdown_token();
    axum::serve(listener, sse_router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl-c received; shutting down SSE server");
                }
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; stopping SSE server");
                }
            }
            transport_ct.cancel();
        })
        .await
        .context("SSE server stopped with error")?;

    Ok(())
}

/// rmcp handler bridging to the shared dispatch.
#[derive(Clone)]
struct CrewToolServer {
    state: Arc<ServerState>,
}

impl ServerHandler for CrewToolServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = tool_definitions(self.state.role())
            .into_iter()
            .map(to_rmcp_tool)
            .collect();
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request
            .arguments
            .map(Value::Object)
            .unwrap_or_else(|| serde_json::json!({}));

        match dispatch(&self.state, request.name.as_ref(), arguments).await {
            Ok(result) => Ok(CallToolResult::success(vec![Content::text(
                result.to_string(),
            )])),
            Err(ToolError::UnknownTool(name)) => Err(McpError::invalid_params(
                format!("unknown tool: {name}"),
                None,
            )),
            Err(ToolError::InvalidArguments(message)) => {
                Err(McpError::invalid_params(message, None))
            }
        }
    }

    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = format!("crew-{}", self.state.role());
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

fn to_rmcp_tool(def: ToolDef) -> Tool {
    let schema = match def.input_schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Tool::new(
        Cow::Borrowed(def.name),
        Cow::Borrowed(def.description),
        Arc::new(schema),
    )
}
