//! JSON-RPC message types for the downstream MCP wire.
//!
//! Messages are newline-delimited JSON-RPC 2.0 on the child's standard
//! streams.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// The `notifications/cancelled` notice for a request id.
    pub fn cancelled(request_id: u64, reason: &str) -> Self {
        Self::new(
            "notifications/cancelled",
            Some(json!({"requestId": request_id, "reason": reason})),
        )
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any inbound message, classified by shape.
///
/// Responses carry an `id` and no `method`; notifications carry a `method`
/// and no `id`; server-to-client requests carry both.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl InboundMessage {
    /// Numeric response id, when this is a response to one of our requests.
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        self.id.as_ref().and_then(Value::as_u64)
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// The request id a `notifications/progress` message refers to, read
    /// from its `progressToken`.
    pub fn progress_token(&self) -> Option<u64> {
        if self.method.as_deref() != Some("notifications/progress") {
            return None;
        }
        self.params
            .as_ref()
            .and_then(|p| p.get("progressToken"))
            .and_then(Value::as_u64)
    }
}

/// Parameters for the MCP `initialize` handshake.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcp-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Capabilities a downstream advertised in its `initialize` result.
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
}

impl ServerCapabilities {
    pub fn from_initialize_result(result: &Value) -> Self {
        let caps = result.get("capabilities");
        let has = |key: &str| {
            caps.and_then(|c| c.get(key))
                .map(|v| !v.is_null())
                .unwrap_or(false)
        };
        let info = |key: &str| {
            result
                .get("serverInfo")
                .and_then(|i| i.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            tools: has("tools"),
            resources: has("resources"),
            prompts: has("prompts"),
            server_name: info("name"),
            server_version: info("version"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains(r#""jsonrpc":"2.0""#));
        assert!(text.contains(r#""id":7"#));
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_inbound_classification() {
        let response: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert_eq!(response.response_id(), Some(3));
        assert!(!response.is_notification());

        let notification: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/message"}"#).unwrap();
        assert!(notification.is_notification());
        assert_eq!(notification.response_id(), None);

        // Server-to-client request: both id and method, not a response.
        let request: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":9,"method":"sampling/createMessage"}"#)
                .unwrap();
        assert_eq!(request.response_id(), None);
        assert!(!request.is_notification());
    }

    #[test]
    fn test_progress_token() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":12,"progress":0.5}}"#,
        )
        .unwrap();
        assert_eq!(msg.progress_token(), Some(12));
    }

    #[test]
    fn test_capabilities_from_initialize() {
        let result = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "prompts": {}},
            "serverInfo": {"name": "demo", "version": "0.1.0"},
        });
        let caps = ServerCapabilities::from_initialize_result(&result);
        assert!(caps.tools);
        assert!(caps.prompts);
        assert!(!caps.resources);
        assert_eq!(caps.server_name.as_deref(), Some("demo"));
    }
}
