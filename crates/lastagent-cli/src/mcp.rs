//! MCP (Model Context Protocol) server over stdio.
//!
//! Lets other agents and IDEs hand tasks to LastAgent. One JSON-RPC 2.0
//! message per line on stdin, one response per line on stdout.
//!
//! Supported methods:
//! - `initialize` → server capabilities
//! - `tools/list` → `route_task`, `list_agents`
//! - `tools/call` → run a tool
//! - `prompts/list`, `resources/list` → empty
//! - `ping`

use crate::AppContext;
use lastagent_core::{SessionState, TaskRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC 2.0 request; `id` is absent for notifications
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct McpToolDef {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct RouteTaskArgs {
    prompt: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    session_id: Option<String>,
    /// Seconds
    #[serde(default)]
    timeout: Option<u64>,
}

impl RouteTaskArgs {
    fn to_request(&self) -> TaskRequest {
        let mut request = TaskRequest::new(self.prompt.clone())
            .with_capabilities(self.capabilities.iter().cloned())
            .with_stream(false);
        if let Some(agent) = self.agent.as_deref().filter(|a| !a.is_empty() && *a != "auto") {
            request = request.with_agent(agent);
        }
        if let Some(system) = &self.system_prompt {
            request = request.with_system_prompt(system.clone());
        }
        if let Some(dir) = &self.working_directory {
            request = request.with_working_directory(dir.clone());
        }
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        request
    }
}

fn tool_definitions() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "route_task",
            description: "Route a task to the best available coding agent and return its output",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Task for the agent" },
                    "agent": { "type": "string", "description": "Force a specific agent" },
                    "capabilities": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Prefer agents with any of these capabilities"
                    },
                    "system_prompt": { "type": "string" },
                    "working_directory": { "type": "string" },
                    "session_id": {
                        "type": "string",
                        "description": "Reuse a session across calls"
                    },
                    "timeout": { "type": "integer", "description": "Seconds" }
                },
                "required": ["prompt"]
            }),
        },
        McpToolDef {
            name: "list_agents",
            description: "List registered agents and whether they are installed",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "capability": {
                        "type": "string",
                        "description": "Only agents with this capability"
                    }
                }
            }),
        },
    ]
}

fn tool_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "isError": is_error,
    })
}

/// MCP bridge over stdin/stdout.
pub struct McpBridge {
    ctx: AppContext,
}

impl McpBridge {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Run the JSON-RPC loop over stdin/stdout.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }

    /// Run the loop over any line-oriented transport until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP server started (JSON-RPC 2.0 over stdio)");
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => {
                    debug!(method = %request.method, "MCP request");
                    self.handle_request(request).await
                }
                Err(e) => Some(JsonRpcResponse::err(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                )),
            };

            if let Some(response) = response {
                let json = serde_json::to_string(&response)?;
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        info!("MCP server shutting down");
        Ok(())
    }

    /// `None` for notifications, which get no reply
    pub async fn handle_request(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.id.is_none() {
            debug!(method = %req.method, "MCP notification");
            return None;
        }

        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id),
            "ping" => JsonRpcResponse::ok(req.id, json!({})),
            "tools/list" => JsonRpcResponse::ok(req.id, json!({ "tools": tool_definitions() })),
            "tools/call" => self.handle_tools_call(req.id, req.params).await,
            "prompts/list" => JsonRpcResponse::ok(req.id, json!({ "prompts": [] })),
            "resources/list" => JsonRpcResponse::ok(req.id, json!({ "resources": [] })),
            _ => JsonRpcResponse::err(
                req.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", req.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": "lastagent",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return JsonRpcResponse::err(id, INVALID_PARAMS, "Missing 'name' parameter"),
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match name.as_str() {
            "route_task" => match serde_json::from_value::<RouteTaskArgs>(arguments) {
                Ok(args) => JsonRpcResponse::ok(id, self.route_task(args).await),
                Err(e) => {
                    JsonRpcResponse::err(id, INVALID_PARAMS, format!("Invalid arguments: {}", e))
                }
            },
            "list_agents" => {
                let capability = arguments.get("capability").and_then(|v| v.as_str());
                let agents = self.ctx.dispatcher.list_agents(capability);
                match serde_json::to_string_pretty(&agents) {
                    Ok(text) => JsonRpcResponse::ok(id, tool_result(text, false)),
                    Err(e) => JsonRpcResponse::ok(id, tool_result(e.to_string(), true)),
                }
            }
            other => JsonRpcResponse::err(id, INVALID_PARAMS, format!("Unknown tool: {}", other)),
        }
    }

    async fn route_task(&self, args: RouteTaskArgs) -> Value {
        let session = match args.session_id.as_deref() {
            Some(id) => self.ctx.sessions.get_or_create(id),
            None => SessionState::ephemeral().into_handle(),
        };

        let turn = match self.ctx.dispatcher.route_and_run(args.to_request(), session).await {
            Ok(turn) => turn,
            Err(e) => {
                error!(error = %e, "route_task failed");
                return tool_result(e.to_string(), true);
            }
        };

        let transcript = turn.collect().await;
        match &transcript.summary {
            Some(summary) if summary.outcome.is_success() => tool_result(transcript.text(), false),
            Some(summary) => {
                let mut text = format!("agent {}: {}", summary.agent, summary.outcome);
                let output = transcript.text();
                if !output.is_empty() {
                    text.push_str("\n\n");
                    text.push_str(&output);
                }
                let tail = summary.stderr_tail.as_deref().map(str::trim);
                if let Some(tail) = tail.filter(|t| !t.is_empty()) {
                    text.push_str("\n\nstderr:\n");
                    text.push_str(tail);
                }
                tool_result(text, true)
            }
            None => tool_result("agent ended without a result", true),
        }
    }
}
