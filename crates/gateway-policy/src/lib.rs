//! Gateway policy: allow/deny lists, output limits, and secret redaction.
//!
//! The policy document is YAML or JSON:
//!
//! ```yaml
//! servers:
//!   denylist: [internal-*]
//! tools:
//!   denylist: ["*::delete_*"]
//! limits:
//!   max_output_bytes: 50000
//! redaction:
//!   patterns:
//!     - 'api_key=\S+'
//! ```
//!
//! Discovery: `--policy` flag, then `MCP_GATEWAY_POLICY`, then
//! `~/.claude/gateway-policy.yaml`. An absent file means permissive
//! defaults; a present-but-broken file is a configuration error.

pub mod output;
pub mod pattern;

pub use output::{process_output, CappedOutput, RedactionRule};
pub use pattern::{GlobPattern, ScopeRules};

use gateway_core::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Allow/deny lists for one scope, as they appear in the policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeLists {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
}

/// Numeric limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_tools_per_server")]
    pub max_tools_per_server: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tools_per_server: default_max_tools_per_server(),
            max_output_bytes: default_max_output_bytes(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_max_tools_per_server() -> usize {
    100
}

fn default_max_output_bytes() -> usize {
    50_000
}

fn default_max_output_tokens() -> usize {
    4_000
}

/// Redaction configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// The policy file, as parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub servers: ScopeLists,
    #[serde(default)]
    pub tools: ScopeLists,
    #[serde(default)]
    pub resources: ScopeLists,
    #[serde(default)]
    pub prompts: ScopeLists,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

/// Patterns applied even when the policy file configures none.
/// They cover the common `key=value` secret shapes and bearer tokens.
const BUILTIN_REDACTION_PATTERNS: &[&str] = &[
    r#"(?i)(?:api[_-]?key|secret|token|password|passwd|pwd)["']?\s*[=:]\s*["']?(?P<secret>[^\s"',;&]+)"#,
    r#"(?i)bearer\s+(?P<token>[A-Za-z0-9\-._~+/]+=*)"#,
    r#"sk-[A-Za-z0-9]{16,}"#,
];

/// Compiled, evaluable policy. Built once per load/refresh and shared as an
/// immutable snapshot.
#[derive(Debug, Clone)]
pub struct Policy {
    servers: ScopeRules,
    tools: ScopeRules,
    resources: ScopeRules,
    prompts: ScopeRules,
    limits: Limits,
    redaction_rules: Vec<RedactionRule>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_document(&PolicyDocument::default()).expect("builtin patterns compile")
    }
}

impl Policy {
    /// Compile a parsed document. Bad redaction regexes are configuration
    /// errors, not silently skipped rules.
    pub fn from_document(doc: &PolicyDocument) -> Result<Self> {
        let mut redaction_rules = Vec::new();
        for pattern in BUILTIN_REDACTION_PATTERNS {
            redaction_rules
                .push(RedactionRule::compile(pattern).expect("builtin patterns compile"));
        }
        for pattern in &doc.redaction.patterns {
            let rule = RedactionRule::compile(pattern).map_err(|e| {
                GatewayError::ConfigInvalid(format!("bad redaction pattern '{}': {}", pattern, e))
            })?;
            redaction_rules.push(rule);
        }

        Ok(Self {
            servers: ScopeRules::new(&doc.servers.allowlist, &doc.servers.denylist),
            tools: ScopeRules::new(&doc.tools.allowlist, &doc.tools.denylist),
            resources: ScopeRules::new(&doc.resources.allowlist, &doc.resources.denylist),
            prompts: ScopeRules::new(&doc.prompts.allowlist, &doc.prompts.denylist),
            limits: doc.limits.clone(),
            redaction_rules,
        })
    }

    /// Load from an explicit path, the env var, or the default location.
    /// A missing file yields the permissive default policy.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match discover_policy_path(explicit) {
            Some(path) if path.is_file() => Self::from_file(&path),
            Some(path) if explicit.is_some() => Err(GatewayError::ConfigInvalid(format!(
                "policy file not found: {}",
                path.display()
            ))),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        // YAML is a superset of JSON, so one parser covers both formats.
        let doc: PolicyDocument = serde_yaml::from_str(&content).map_err(|e| {
            GatewayError::ConfigInvalid(format!("cannot parse {}: {}", path.display(), e))
        })?;
        Self::from_document(&doc)
    }

    pub fn is_server_allowed(&self, server: &str) -> bool {
        self.servers.is_allowed(server)
    }

    /// A tool is visible iff its server passes server policy and the tool id
    /// passes tool policy.
    pub fn is_tool_allowed(&self, server: &str, tool_id: &str) -> bool {
        self.is_server_allowed(server) && self.tools.is_allowed(tool_id)
    }

    pub fn is_resource_allowed(&self, server: &str, uri: &str) -> bool {
        self.is_server_allowed(server) && self.resources.is_allowed(uri)
    }

    pub fn is_prompt_allowed(&self, server: &str, name: &str) -> bool {
        self.is_server_allowed(server) && self.prompts.is_allowed(name)
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Redact and size-cap a payload. Applied last, after aggregation.
    pub fn process_output(&self, value: &serde_json::Value) -> CappedOutput {
        process_output(
            value,
            &self.redaction_rules,
            self.limits.max_output_bytes,
            self.limits.max_output_tokens,
        )
    }
}

fn discover_policy_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os("MCP_GATEWAY_POLICY") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".claude").join("gateway-policy.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy_allows_everything() {
        let policy = Policy::default();
        assert!(policy.is_server_allowed("any-server"));
        assert!(policy.is_tool_allowed("any-server", "any-server::any_tool"));
        assert_eq!(policy.limits().max_tools_per_server, 100);
        assert_eq!(policy.limits().max_output_bytes, 50_000);
        assert_eq!(policy.limits().max_output_tokens, 4_000);
    }

    #[test]
    fn test_denied_server_blocks_its_tools() {
        let doc: PolicyDocument = serde_yaml::from_str(
            r#"
servers:
  denylist: [blocked-*]
"#,
        )
        .unwrap();
        let policy = Policy::from_document(&doc).unwrap();
        assert!(!policy.is_server_allowed("blocked-server"));
        assert!(!policy.is_tool_allowed("blocked-server", "blocked-server::read"));
        assert!(policy.is_server_allowed("open-server"));
    }

    #[test]
    fn test_tool_denylist_glob() {
        let doc: PolicyDocument = serde_yaml::from_str(
            r#"
tools:
  denylist: ["*::delete_*"]
"#,
        )
        .unwrap();
        let policy = Policy::from_document(&doc).unwrap();
        assert!(!policy.is_tool_allowed("x", "x::delete_all"));
        assert!(policy.is_tool_allowed("x", "x::create_item"));
    }

    #[test]
    fn test_allowlist_restricts_servers() {
        let doc: PolicyDocument = serde_yaml::from_str(
            r#"
servers:
  allowlist: [github, jira]
"#,
        )
        .unwrap();
        let policy = Policy::from_document(&doc).unwrap();
        assert!(policy.is_server_allowed("github"));
        assert!(!policy.is_server_allowed("slack"));
    }

    #[test]
    fn test_parses_json_policy_too() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{"servers": {"denylist": ["x"]}, "limits": {"max_output_bytes": 10000}}"#,
        )
        .unwrap();
        let policy = Policy::from_file(&path).unwrap();
        assert!(!policy.is_server_allowed("x"));
        assert_eq!(policy.limits().max_output_bytes, 10_000);
    }

    #[test]
    fn test_builtin_redaction_covers_common_shapes() {
        let policy = Policy::default();
        let out = policy.process_output(&json!({
            "log": "API_KEY=sk-1234567890 password: hunter2 Bearer eyJhbGciOiJIUzI1NiJ9"
        }));
        let text = serde_json::to_string(&out.result).unwrap();
        assert!(!text.contains("sk-1234567890"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert!(text.contains("***"));
    }

    #[test]
    fn test_bad_redaction_pattern_is_config_error() {
        let doc = PolicyDocument {
            redaction: RedactionConfig {
                patterns: vec!["([unclosed".to_string()],
            },
            ..Default::default()
        };
        let err = Policy::from_document(&doc).unwrap_err();
        assert_eq!(err.code(), "ConfigInvalid");
    }

    #[test]
    fn test_custom_pattern_redacts_scenario() {
        let doc = PolicyDocument {
            redaction: RedactionConfig {
                patterns: vec![r#"api_key=[^\s"]+"#.to_string()],
            },
            ..Default::default()
        };
        let policy = Policy::from_document(&doc).unwrap();
        let out = policy.process_output(&json!({"log": "api_key=secret123"}));
        assert_eq!(out.result, json!({"log": "api_key=***"}));
    }
}
