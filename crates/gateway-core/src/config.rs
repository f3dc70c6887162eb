//! MCP configuration loading and discovery.
//!
//! The gateway reads standard `.mcp.json` documents:
//!
//! ```json
//! {"mcpServers": {"github": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-github"]}}}
//! ```
//!
//! Discovery order: an explicit path (`--config` or `MCP_GATEWAY_CONFIG`)
//! replaces everything else; otherwise the project file (`<project>/.mcp.json`)
//! is merged over the user files (`~/.mcp.json`, `~/.claude/.mcp.json`),
//! with the project winning on name collisions.

use crate::error::{GatewayError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw server entry as it appears in `.mcp.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Structure of a `.mcp.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpServerEntry>,
}

/// Where a resolved server spec came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Project,
    User,
    Custom,
}

/// Launch description for one downstream server.
///
/// Immutable once resolved; refresh produces a new set of specs and diffs
/// them against the running sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub source: ConfigSource,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ServerSpec {
    fn from_entry(name: &str, source: ConfigSource, entry: McpServerEntry) -> Result<Self> {
        if entry.command.trim().is_empty() {
            return Err(GatewayError::ConfigInvalid(format!(
                "server '{}' is missing a command",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            source,
            command: entry.command,
            args: entry.args,
            env: entry.env,
            cwd: entry.cwd,
        })
    }
}

/// Resolved configuration paths for one load.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Explicit path; replaces project and user files entirely.
    pub custom: Option<PathBuf>,
    /// Project root for `.mcp.json` discovery.
    pub project_root: Option<PathBuf>,
}

impl ConfigPaths {
    /// Build paths from CLI arguments plus the `MCP_GATEWAY_CONFIG` env var.
    pub fn discover(custom: Option<PathBuf>, project_root: Option<PathBuf>) -> Self {
        let custom = custom.or_else(|| std::env::var_os("MCP_GATEWAY_CONFIG").map(PathBuf::from));
        Self {
            custom,
            project_root,
        }
    }

    fn user_files() -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(".mcp.json"));
            files.push(home.join(".claude").join(".mcp.json"));
        }
        files
    }
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string. Expansion happens on the raw
/// text before parsing so values never transit through logs.
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{(\w+)\}").expect("static pattern");
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

fn parse_config_file(path: &Path) -> Result<McpConfigFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        GatewayError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
    })?;
    let content = expand_env_vars(&content);
    serde_json::from_str(&content).map_err(|e| {
        GatewayError::ConfigInvalid(format!("cannot parse {}: {}", path.display(), e))
    })
}

/// Load and merge all discovered config files into resolved server specs.
///
/// Returns specs in stable name order. Individual bad entries fail the whole
/// load with `ConfigInvalid`; callers decide whether that is fatal (startup)
/// or local (refresh).
pub fn load_server_specs(paths: &ConfigPaths) -> Result<Vec<ServerSpec>> {
    let mut merged: HashMap<String, (ConfigSource, McpServerEntry)> = HashMap::new();

    if let Some(custom) = &paths.custom {
        let file = parse_config_file(custom)?;
        for (name, entry) in file.mcp_servers {
            merged.insert(name, (ConfigSource::Custom, entry));
        }
    } else {
        // User files first so the project file overrides on collision.
        for user_file in ConfigPaths::user_files() {
            if !user_file.is_file() {
                continue;
            }
            let file = parse_config_file(&user_file)?;
            for (name, entry) in file.mcp_servers {
                merged.entry(name).or_insert((ConfigSource::User, entry));
            }
        }
        if let Some(root) = &paths.project_root {
            let project_file = root.join(".mcp.json");
            if project_file.is_file() {
                let file = parse_config_file(&project_file)?;
                for (name, entry) in file.mcp_servers {
                    merged.insert(name, (ConfigSource::Project, entry));
                }
            }
        }
    }

    let mut specs: Vec<ServerSpec> = merged
        .into_iter()
        .map(|(name, (source, entry))| {
            validate_component(&name)?;
            ServerSpec::from_entry(&name, source, entry)
        })
        .collect::<Result<_>>()?;
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

/// Separator between server name and tool name in tool ids.
pub const TOOL_ID_SEPARATOR: &str = "::";

/// Build a namespaced tool id. Components must not contain `::`.
pub fn make_tool_id(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, TOOL_ID_SEPARATOR, tool)
}

/// Split a tool id into `(server, tool)`.
pub fn parse_tool_id(tool_id: &str) -> Result<(&str, &str)> {
    tool_id
        .split_once(TOOL_ID_SEPARATOR)
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
        .ok_or_else(|| GatewayError::ToolNotFound {
            tool_id: tool_id.to_string(),
        })
}

/// Reject names that would be ambiguous inside a tool id.
pub fn validate_component(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GatewayError::ConfigInvalid(
            "server name must not be empty".to_string(),
        ));
    }
    if name.contains(TOOL_ID_SEPARATOR) {
        return Err(GatewayError::ConfigInvalid(format!(
            "'{}' must not contain '{}'",
            name, TOOL_ID_SEPARATOR
        )));
    }
    Ok(())
}
