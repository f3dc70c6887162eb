//! Downstream session management for the MCP gateway.
//!
//! One [`Session`] per configured server: a child process speaking
//! newline-delimited JSON-RPC on its standard streams, supervised by the
//! [`SessionManager`].

pub mod manager;
pub mod protocol;
pub mod session;

pub use manager::{RetryPolicy, SessionManager, StartErrors};
pub use protocol::{
    InboundMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, ServerCapabilities,
    JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
pub use session::{
    format_request_id, parse_request_id, CancelOutcome, HeartbeatFn, Inventory, PromptDescriptor,
    ResourceDescriptor, ServerNotification, Session, SessionState, SessionStatus, ToolDescriptor,
    CANCEL_HEARTBEAT_GUARD, DEFAULT_CALL_TIMEOUT, MAX_PENDING_REQUESTS,
};
