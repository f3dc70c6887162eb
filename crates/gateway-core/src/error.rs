//! Error types shared across the gateway.

use thiserror::Error;

/// Errors that can occur anywhere in the gateway.
///
/// Every variant maps to a stable code string via [`GatewayError::code`];
/// the dispatcher puts that code in upstream error envelopes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration is malformed or missing required fields.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The downstream server terminated while requests were pending.
    #[error("session {server} closed: {reason}")]
    SessionClosed { server: String, reason: String },

    /// No heartbeat within the deadline.
    #[error("request to {server} timed out after {elapsed_secs}s")]
    SessionTimeout { server: String, elapsed_secs: u64 },

    /// Catalog lookup failed.
    #[error("tool not found: {tool_id}")]
    ToolNotFound { tool_id: String },

    /// Policy blocked the tool.
    #[error("tool denied by policy: {tool_id}")]
    ToolDenied { tool_id: String },

    /// Argument validation against the tool schema failed.
    #[error("invalid argument for {tool_id}: {reason}")]
    InvalidArgument { tool_id: String, reason: String },

    /// Per-session pending-request cap reached.
    #[error("server {server} is busy ({pending} requests pending)")]
    ServerBusy { server: String, pending: usize },

    /// The upstream caller cancelled the request.
    #[error("request cancelled by caller")]
    UpstreamCancelled,

    /// An install job reached a terminal failure.
    #[error("provisioning {server} failed at {step}: {reason}")]
    ProvisionFailed {
        server: String,
        step: String,
        reason: String,
    },

    /// The downstream server returned a JSON-RPC error.
    #[error("downstream error from {server}: {message}")]
    Downstream { server: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any unexpected condition; logged with context, surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable code string for upstream error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "ConfigInvalid",
            Self::SessionClosed { .. } => "SessionClosed",
            Self::SessionTimeout { .. } => "SessionTimeout",
            Self::ToolNotFound { .. } => "ToolNotFound",
            Self::ToolDenied { .. } => "ToolDenied",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::ServerBusy { .. } => "ServerBusy",
            Self::UpstreamCancelled => "UpstreamCancelled",
            Self::ProvisionFailed { .. } => "ProvisionFailed",
            Self::Downstream { .. } => "DownstreamError",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "Internal",
        }
    }

    /// Message safe to show upstream. Internal errors are logged with full
    /// context but surfaced as a generic line.
    pub fn upstream_message(&self) -> String {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                "internal gateway error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;
