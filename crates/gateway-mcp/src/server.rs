//! The upstream MCP server: newline-delimited JSON-RPC 2.0 on the
//! gateway's own standard streams.
//!
//! Only the nine meta-tools are listed; resources and prompts are proxied
//! under namespaced ids. Requests are served concurrently; a write lock on
//! stdout keeps responses whole.

use gateway_core::{parse_tool_id, GatewayError};
use gateway_policy::Policy;
use gateway_session::MCP_PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dispatcher::{meta_tool_definitions, GatewayTools};

/// A request from the upstream client. Upstream ids may be numbers or
/// strings, so they stay as raw values.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A response to the upstream client.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl UpstreamResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({"code": code, "message": message.into()})),
        }
    }
}

/// The upstream-facing server.
pub struct GatewayServer {
    tools: Arc<GatewayTools>,
}

impl GatewayServer {
    pub fn new(tools: Arc<GatewayTools>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &Arc<GatewayTools> {
        &self.tools
    }

    /// Serve until stdin closes.
    pub async fn run(&self) -> gateway_core::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
        info!("gateway serving on stdio");
        self.serve(stdin, stdout).await
    }

    /// Transport-agnostic serve loop, split out so tests can drive it with
    /// in-memory pipes.
    pub async fn serve<R, W>(
        &self,
        reader: BufReader<R>,
        writer: Arc<Mutex<W>>,
    ) -> gateway_core::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request: UpstreamRequest = match serde_json::from_str(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "unparseable upstream line");
                    let response = UpstreamResponse::error(None, -32700, "parse error");
                    write_response(&writer, &response).await;
                    continue;
                }
            };

            // Notifications never get a response.
            if request.id.is_none() {
                self.handle_notification(request).await;
                continue;
            }

            let tools = self.tools.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let response = handle_request(&tools, request).await;
                if let Some(response) = response {
                    write_response(&writer, &response).await;
                }
            });
        }
        info!("upstream closed stdin, shutting down");
        Ok(())
    }

    async fn handle_notification(&self, request: UpstreamRequest) {
        match request.method.as_str() {
            "notifications/cancelled" => {
                if let Some(request_id) = request.params.as_ref().and_then(|p| p.get("requestId"))
                {
                    self.tools.cancel_upstream(request_id).await;
                }
            }
            "notifications/initialized" => {}
            other => debug!(method = %other, "ignoring upstream notification"),
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &Arc<Mutex<W>>,
    response: &UpstreamResponse,
) {
    let serialized = match serde_json::to_string(response) {
        Ok(serialized) => serialized,
        Err(e) => {
            warn!(error = %e, "failed to serialize response");
            return;
        }
    };
    let mut guard = writer.lock().await;
    let _ = guard.write_all(serialized.as_bytes()).await;
    let _ = guard.write_all(b"\n").await;
    let _ = guard.flush().await;
}

async fn handle_request(
    tools: &Arc<GatewayTools>,
    request: UpstreamRequest,
) -> Option<UpstreamResponse> {
    let id = request.id.clone();
    let response = match request.method.as_str() {
        "initialize" => UpstreamResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "mcp-gateway",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {
                    "tools": {"listChanged": true},
                    "resources": {},
                    "prompts": {},
                },
            }),
        ),
        "ping" => UpstreamResponse::success(id, json!({})),
        "tools/list" => {
            UpstreamResponse::success(id, json!({"tools": meta_tool_definitions()}))
        }
        "tools/call" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let envelope = tools
                .handle_tool_call(name, &arguments, request.id.as_ref())
                .await;
            let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
            UpstreamResponse::success(
                id,
                json!({"content": [{"type": "text", "text": text}]}),
            )
        }
        "resources/list" => {
            let snapshot = tools.catalog().snapshot();
            let resources: Vec<Value> = snapshot
                .resources()
                .iter()
                .map(|entry| {
                    json!({
                        "uri": entry.resource_id,
                        "name": entry.name,
                        "description": entry.description,
                        "mimeType": entry.mime_type,
                    })
                })
                .collect();
            UpstreamResponse::success(id, json!({"resources": resources}))
        }
        "resources/read" => {
            let uri = request
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(Value::as_str)
                .unwrap_or("");
            match proxy_resource_read(tools, uri).await {
                Ok(result) => UpstreamResponse::success(id, result),
                Err(e) => UpstreamResponse::error(id, -32002, e.upstream_message()),
            }
        }
        "prompts/list" => {
            let snapshot = tools.catalog().snapshot();
            let prompts: Vec<Value> = snapshot
                .prompts()
                .iter()
                .map(|entry| {
                    json!({
                        "name": entry.prompt_id,
                        "description": entry.description,
                        "arguments": entry.arguments,
                    })
                })
                .collect();
            UpstreamResponse::success(id, json!({"prompts": prompts}))
        }
        "prompts/get" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned();
            match proxy_prompt_get(tools, name, arguments).await {
                Ok(result) => UpstreamResponse::success(id, result),
                Err(e) => UpstreamResponse::error(id, -32002, e.upstream_message()),
            }
        }
        other => UpstreamResponse::error(id, -32601, format!("method not found: {}", other)),
    };
    Some(response)
}

/// Route a namespaced resource uri to its owning session, with policy
/// output processing applied to what comes back.
async fn proxy_resource_read(
    tools: &Arc<GatewayTools>,
    namespaced_uri: &str,
) -> gateway_core::Result<Value> {
    let (server, uri) = parse_tool_id(namespaced_uri).map_err(|_| GatewayError::ToolNotFound {
        tool_id: namespaced_uri.to_string(),
    })?;

    let policy = current_policy(tools);
    if !policy.is_resource_allowed(server, uri) {
        return Err(GatewayError::ToolDenied {
            tool_id: namespaced_uri.to_string(),
        });
    }

    let session = tools
        .manager()
        .get(server)
        .await
        .ok_or_else(|| GatewayError::SessionClosed {
            server: server.to_string(),
            reason: "server is not running".to_string(),
        })?;
    let result = session.read_resource(uri).await?;
    Ok(policy.process_output(&result).result)
}

async fn proxy_prompt_get(
    tools: &Arc<GatewayTools>,
    namespaced_name: &str,
    arguments: Option<Value>,
) -> gateway_core::Result<Value> {
    let (server, name) = parse_tool_id(namespaced_name).map_err(|_| GatewayError::ToolNotFound {
        tool_id: namespaced_name.to_string(),
    })?;

    let policy = current_policy(tools);
    if !policy.is_prompt_allowed(server, name) {
        return Err(GatewayError::ToolDenied {
            tool_id: namespaced_name.to_string(),
        });
    }

    let session = tools
        .manager()
        .get(server)
        .await
        .ok_or_else(|| GatewayError::SessionClosed {
            server: server.to_string(),
            reason: "server is not running".to_string(),
        })?;
    let result = session.get_prompt(name, arguments).await?;
    Ok(policy.process_output(&result).result)
}

fn current_policy(tools: &Arc<GatewayTools>) -> Arc<Policy> {
    tools.policy_snapshot()
}
