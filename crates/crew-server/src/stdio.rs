//! Stdio transport: JSON-RPC 2.0 over stdin/stdout.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::state::ServerState;
use crate::tools::{ToolError, dispatch, tool_definitions};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Serve MCP over stdio until stdin closes.
pub async fn serve_stdio(state: Arc<ServerState>) -> Result<()> {
    info!(role = %state.role(), "starting MCP server on stdio");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read line from stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("received frame: {trimmed}");
        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                error!("failed to parse JSON-RPC request: {e}");
                write_response(
                    &stdout,
                    &JsonRpcResponse::error(None, -32700, format!("Parse error: {e}")),
                )?;
                continue;
            }
        };

        let is_notification = request.id.is_none();
        let response = handle_request(&state, request).await;
        if !is_notification {
            write_response(&stdout, &response)?;
        }
    }

    info!("stdin closed; MCP stdio server shutting down");
    Ok(())
}

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

async fn handle_request(state: &ServerState, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": format!("crew-{}", state.role()),
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "notifications/initialized" => JsonRpcResponse::result(None, Value::Null),
        "ping" => JsonRpcResponse::result(id, serde_json::json!({})),
        "tools/list" => {
            let tools: Vec<Value> = tool_definitions(state.role())
                .into_iter()
                .map(|def| {
                    serde_json::json!({
                        "name": def.name,
                        "description": def.description,
                        "inputSchema": def.input_schema,
                    })
                })
                .collect();
            JsonRpcResponse::result(id, serde_json::json!({ "tools": tools }))
        }
        "tools/call" => {
            let (name, arguments) = match parse_call_params(request.params) {
                Ok(pair) => pair,
                Err(message) => return JsonRpcResponse::error(id, -32602, message),
            };
            match dispatch(state, &name, arguments).await {
                Ok(result) => JsonRpcResponse::result(
                    id,
                    serde_json::json!({
                        "content": [{
                            "type": "text",
                            "text": result.to_string(),
                        }]
                    }),
                ),
                Err(ToolError::UnknownTool(name)) => {
                    JsonRpcResponse::error(id, -32601, format!("unknown tool: {name}"))
                }
                Err(ToolError::InvalidArguments(message)) => {
                    JsonRpcResponse::error(id, -32602, message)
                }
            }
        }
        "shutdown" => JsonRpcResponse::result(id, Value::Null),
        other => JsonRpcResponse::error(id, -32601, format!("Method not found: {other}")),
    }
}

fn parse_call_params(params: Option<Value>) -> Result<(String, Value), String> {
    let params = params.ok_or_else(|| "missing params".to_string())?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing tool name".to_string())?
        .to_string();
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Ok((name, arguments))
}

fn write_response(stdout: &std::io::Stdout, response: &JsonRpcResponse) -> Result<()> {
    let payload = serde_json::to_string(response).context("failed to serialize response")?;
    let mut handle = stdout.lock();
    writeln!(handle, "{payload}").context("failed to write response")?;
    handle.flush().context("failed to flush response")
}
