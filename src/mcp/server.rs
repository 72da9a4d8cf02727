//! MCP server
//!
//! JSON-RPC 2.0 over stdio, one frame per line. Each inbound line is
//! decoded and answered independently: notifications produce no reply,
//! everything else produces exactly one serialized response line. The
//! handshake gate (`initialize` before anything but `ping`) is enforced in
//! one place, at dispatch. Logging goes to stderr so stdout stays clean
//! for the protocol.

use std::io::{BufRead, Write};

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::handlers::ToolHandler;
use super::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult, ToolsCapability,
    ToolsListResult,
};
use super::tools::all_tools;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "waveboard";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP server that answers JSON-RPC 2.0 frames over stdio.
pub struct McpServer {
    tools: ToolHandler,
    initialized: bool,
}

impl McpServer {
    pub fn new(tools: ToolHandler) -> Self {
        Self {
            tools,
            initialized: false,
        }
    }

    /// Serve until stdin closes. A read failure ends the session with an
    /// error; a malformed frame only costs that frame.
    pub async fn run(&mut self) -> Result<()> {
        info!("MCP server starting on stdio");
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout().lock();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            debug!("frame in: {}", line);
            if let Some(reply) = self.process_line(&line).await {
                debug!("frame out: {}", reply);
                writeln!(stdout, "{}", reply)?;
                stdout.flush()?;
            }
        }

        info!("stdin closed, MCP server shutting down");
        Ok(())
    }

    /// Decode one frame and produce the serialized reply it is owed, if
    /// any. Notifications (no id) never get one.
    pub(crate) async fn process_line(&mut self, line: &str) -> Option<String> {
        let frame: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(e) => {
                return reply(JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::parse_error(e.to_string()),
                ))
            }
        };

        let Some(id) = frame.id.clone() else {
            self.note_notification(&frame.method);
            return None;
        };

        reply(match self.dispatch(&frame).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, e),
        })
    }

    fn note_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => info!("client confirmed initialization"),
            "notifications/cancelled" => warn!("request cancelled by client"),
            other => debug!("ignoring notification: {}", other),
        }
    }

    async fn dispatch(&mut self, frame: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        // ping and initialize are the only methods admitted pre-handshake.
        match frame.method.as_str() {
            "ping" => return Ok(json!({})),
            "initialize" => return self.initialize(frame.params.as_ref()),
            _ => {}
        }
        if !self.initialized {
            return Err(JsonRpcError::invalid_request("server not initialized"));
        }

        match frame.method.as_str() {
            "tools/list" => to_result(ToolsListResult { tools: all_tools() }),
            "tools/call" => self.call_tool(frame.params.as_ref()).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn initialize(&mut self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let params: Option<InitializeParams> = params
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let client_protocol = params
            .as_ref()
            .map(|p| p.protocol_version.as_str())
            .unwrap_or(PROTOCOL_VERSION);
        info!("initializing (client protocol: {})", client_protocol);
        if let Some(client) = params.as_ref().and_then(|p| p.client_info.as_ref()) {
            info!(
                "client: {} v{}",
                client.name,
                client.version.as_deref().unwrap_or("unknown")
            );
        }

        self.initialized = true;
        to_result(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        })
    }

    async fn call_tool(&mut self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("params required"))?;
        let call: ToolCallParams = serde_json::from_value(params.clone())
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        info!("tool call: {}", call.name);
        debug!("arguments: {:?}", call.arguments);

        let outcome = match self.tools.handle(&call.name, call.arguments).await {
            Ok(body) => {
                let text = serde_json::to_string_pretty(&body)
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
                ToolCallResult::success(text)
            }
            Err(e) => {
                error!("tool error: {}", e);
                ToolCallResult::error(e.to_string())
            }
        };
        to_result(outcome)
    }
}

fn reply(response: JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(&response) {
        Ok(body) => Some(body),
        Err(e) => {
            error!("unserializable response dropped: {}", e);
            None
        }
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
