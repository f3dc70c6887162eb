//! `init`: write starter configuration files.

use std::path::{Path, PathBuf};

use super::EXIT_CONFIG;

const STARTER_MCP_JSON: &str = r#"{
  "mcpServers": {
    "filesystem": {
      "command": "npx",
      "args": ["-y", "@modelcontextprotocol/server-filesystem", "."]
    }
  }
}
"#;

const STARTER_POLICY: &str = r#"# mcp-gateway policy
# Denials win over allowances; empty allowlists allow everything.
servers:
  allowlist: []
  denylist: []
tools:
  allowlist: []
  denylist: []
limits:
  max_tools_per_server: 100
  max_output_bytes: 50000
  max_output_tokens: 4000
redaction:
  patterns: []
"#;

pub fn run(project: Option<&PathBuf>, force: bool) -> i32 {
    let project_dir = project
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let config_path = project_dir.join(".mcp.json");
    if let Err(code) = write_file(&config_path, STARTER_MCP_JSON, force) {
        return code;
    }
    println!("wrote {}", config_path.display());

    if let Some(home) = dirs::home_dir() {
        let policy_path = home.join(".claude").join("gateway-policy.yaml");
        if policy_path.exists() && !force {
            println!("kept existing {}", policy_path.display());
        } else {
            if let Some(parent) = policy_path.parent() {
                if std::fs::create_dir_all(parent).is_err() {
                    eprintln!("cannot create {}", parent.display());
                    return EXIT_CONFIG;
                }
            }
            if let Err(code) = write_file(&policy_path, STARTER_POLICY, true) {
                return code;
            }
            println!("wrote {}", policy_path.display());
        }
    }

    println!("edit .mcp.json and run `mcp-gateway` to serve");
    0
}

fn write_file(path: &Path, content: &str, force: bool) -> Result<(), i32> {
    if path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
        return Err(EXIT_CONFIG);
    }
    std::fs::write(path, content).map_err(|e| {
        eprintln!("cannot write {}: {}", path.display(), e);
        EXIT_CONFIG
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join(".mcp.json");
        std::fs::write(&config, "{}").unwrap();

        assert!(write_file(&config, STARTER_MCP_JSON, false).is_err());
        assert_eq!(std::fs::read_to_string(&config).unwrap(), "{}");

        assert!(write_file(&config, STARTER_MCP_JSON, true).is_ok());
        assert!(std::fs::read_to_string(&config)
            .unwrap()
            .contains("mcpServers"));
    }

    #[test]
    fn test_starter_files_parse() {
        let config: serde_json::Value = serde_json::from_str(STARTER_MCP_JSON).unwrap();
        assert!(config["mcpServers"].is_object());

        let policy: serde_yaml::Value = serde_yaml::from_str(STARTER_POLICY).unwrap();
        assert!(policy.get("limits").is_some());
    }
}
