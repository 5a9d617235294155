//! MCP server over newline-delimited JSON-RPC on stdio.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use gworkspace_auth::AuthContext;

use crate::initialize;
use crate::protocol::{
    error, success, InitializeRequest, JsonRpcRequest, JsonRpcResponse, ToolsCallRequest,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::tools::{ToolCallError, ToolRegistry};

pub struct McpServer {
    ctx: AuthContext,
    registry: ToolRegistry,
}

impl McpServer {
    pub fn new(ctx: AuthContext) -> Self {
        Self {
            ctx,
            registry: ToolRegistry::new(),
        }
    }

    /// Serve until the reader hits EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP server ready on stdio");
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(trimmed).await {
                writer.write_all(serde_json::to_string(&response)?.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        info!("stdin closed, shutting down");
        Ok(())
    }

    /// One request in, at most one response out. Notifications get none.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(req) => req,
            Err(e) => return Some(error(Value::Null, PARSE_ERROR, format!("parse error: {}", e))),
        };

        if request.jsonrpc != "2.0" {
            let id = request.id.unwrap_or(Value::Null);
            return Some(error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }

        let Some(id) = request.id.clone() else {
            debug!("Notification {}", request.method);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => match serde_json::from_value::<InitializeRequest>(request.params) {
                Ok(init) => to_success(id, initialize::handle_initialize(init)),
                Err(e) => error(id, INVALID_PARAMS, format!("invalid initialize params: {}", e)),
            },
            "ping" | "notifications/initialized" => success(id, serde_json::json!({})),
            "tools/list" => to_success(id, self.registry.list_response()),
            "tools/call" => match serde_json::from_value::<ToolsCallRequest>(request.params) {
                Ok(call) => match self.registry.call_tool(&self.ctx, &call.name, call.arguments).await {
                    Ok(result) => to_success(id, result),
                    Err(ToolCallError::UnknownTool(name)) => {
                        error(id, METHOD_NOT_FOUND, format!("unknown tool: {}", name))
                    }
                },
                Err(e) => error(id, INVALID_PARAMS, format!("invalid tools/call params: {}", e)),
            },
            _ => error(id, METHOD_NOT_FOUND, format!("method not found: {}", request.method)),
        };
        Some(response)
    }
}

fn to_success<T: serde::Serialize>(id: Value, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => success(id, value),
        Err(e) => error(id, INTERNAL_ERROR, format!("failed to encode result: {}", e)),
    }
}
