//! Core types for the MCP gateway.
//!
//! This crate holds what every other gateway crate needs: the error
//! taxonomy, MCP config discovery, and the static provisioning manifest.

pub mod config;
pub mod error;
pub mod manifest;

pub use config::{
    load_server_specs, make_tool_id, parse_tool_id, validate_component, ConfigPaths, ConfigSource,
    McpConfigFile, McpServerEntry, ServerSpec, TOOL_ID_SEPARATOR,
};
pub use error::{GatewayError, Result};
pub use manifest::{CliAlternative, Manifest, ManifestServer, Platform};

use std::path::PathBuf;

/// User-scoped cache directory (`~/.cache/mcp-gateway/`).
///
/// Holds logs, the status snapshot, and provisioning scratch space. Nothing
/// in it is authoritative; a missing cache dir is never an error for reads.
pub fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("mcp-gateway"))
}
