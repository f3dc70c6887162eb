//! End-to-end dispatcher tests over scripted fake downstream servers.

use gateway_core::ConfigPaths;
use gateway_mcp::dispatcher::GatewayTools;
use gateway_session::RetryPolicy;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const HELLO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *notifications/*) ;;
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"hello","version":"1.0.0"}}}\n' "$id";;
    *tools/list*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"hello","description":"Say hello to a person by name.","inputSchema":{"type":"object","properties":{"name":{"type":"string"}},"required":["name"]}}]}}\n' "$id";;
    *tools/call*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"hello world, this is a long-ish reply padded for size checks"}]}}\n' "$id";;
    *) ;;
  esac
done
"#;

const LEAKY_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *notifications/*) ;;
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"leaky","version":"1.0.0"}}}\n' "$id";;
    *tools/list*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"tail_log","description":"Read the service log.","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id";;
    *tools/call*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"log":"api_key=secret123"}}\n' "$id";;
    *) ;;
  esac
done
"#;

const DELETER_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *notifications/*) ;;
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"deleter","version":"1.0.0"}}}\n' "$id";;
    *tools/list*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"delete_all","description":"Delete every record.","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id";;
    *) ;;
  esac
done
"#;

struct Fixture {
    tools: Arc<GatewayTools>,
    _dir: TempDir,
}

async fn fixture(servers: &[(&str, &str)], policy_yaml: Option<&str>) -> Fixture {
    let dir = TempDir::new().unwrap();

    let mut mcp_servers = serde_json::Map::new();
    for (name, script) in servers {
        mcp_servers.insert(
            name.to_string(),
            json!({"command": "sh", "args": ["-c", script]}),
        );
    }
    let config_path = dir.path().join("mcp.json");
    std::fs::write(
        &config_path,
        serde_json::to_string(&json!({"mcpServers": mcp_servers})).unwrap(),
    )
    .unwrap();

    let policy_path: Option<PathBuf> = policy_yaml.map(|yaml| {
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    });

    let paths = ConfigPaths {
        custom: Some(config_path),
        project_root: None,
    };
    let (tools, _rx) = GatewayTools::bootstrap(paths, policy_path, RetryPolicy::none())
        .await
        .unwrap();
    Fixture { tools, _dir: dir }
}

/// Exits immediately, so the handshake fails fast.
const BROKEN_SERVER: &str = "exit 7";

#[tokio::test]
async fn test_mixed_fleet_health_and_catalog() {
    let fx = fixture(&[("a", HELLO_SERVER), ("b", BROKEN_SERVER)], None).await;

    let health = fx.tools.handle_tool_call("health", &json!({}), None).await;
    assert_eq!(health["ok"], json!(true));
    let servers = health["result"]["servers"].as_array().unwrap();
    let state_of = |name: &str| {
        servers
            .iter()
            .find(|s| s["name"] == json!(name))
            .map(|s| s["state"].clone())
            .unwrap()
    };
    assert_eq!(state_of("a"), json!("ready"));
    assert_eq!(state_of("b"), json!("failed"));

    let search = fx
        .tools
        .handle_tool_call("catalog_search", &json!({}), None)
        .await;
    let results = search["result"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["tool_id"], json!("a::hello"));
    assert_eq!(results[0]["availability"], json!("online"));
}

#[tokio::test]
async fn test_denylist_hides_and_denies() {
    let policy = r#"
tools:
  denylist: ["*::delete_*"]
"#;
    let fx = fixture(&[("x", DELETER_SERVER)], Some(policy)).await;

    let search = fx
        .tools
        .handle_tool_call("catalog_search", &json!({"query": "delete"}), None)
        .await;
    assert_eq!(search["result"]["results"], json!([]));

    let describe = fx
        .tools
        .handle_tool_call("describe", &json!({"tool_id": "x::delete_all"}), None)
        .await;
    assert_eq!(describe["ok"], json!(false));
    assert_eq!(describe["error"]["code"], json!("ToolDenied"));
}

#[tokio::test]
async fn test_describe_then_invoke_law() {
    let fx = fixture(&[("a", HELLO_SERVER)], None).await;

    let describe = fx
        .tools
        .handle_tool_call("describe", &json!({"tool_id": "a::hello"}), None)
        .await;
    assert_eq!(describe["ok"], json!(true));
    assert_eq!(
        describe["result"]["input_schema"]["required"],
        json!(["name"])
    );

    let invoke = fx
        .tools
        .handle_tool_call(
            "invoke",
            &json!({"tool_id": "a::hello", "arguments": {"name": "world"}}),
            None,
        )
        .await;
    assert_eq!(invoke["ok"], json!(true));
    assert!(invoke["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("hello world"));
}

#[tokio::test]
async fn test_invoke_validates_arguments() {
    let fx = fixture(&[("a", HELLO_SERVER)], None).await;

    let missing = fx
        .tools
        .handle_tool_call("invoke", &json!({"tool_id": "a::hello", "arguments": {}}), None)
        .await;
    assert_eq!(missing["ok"], json!(false));
    assert_eq!(missing["error"]["code"], json!("InvalidArgument"));

    let wrong_type = fx
        .tools
        .handle_tool_call(
            "invoke",
            &json!({"tool_id": "a::hello", "arguments": {"name": 5}}),
            None,
        )
        .await;
    assert_eq!(wrong_type["error"]["code"], json!("InvalidArgument"));

    let unknown = fx
        .tools
        .handle_tool_call(
            "invoke",
            &json!({"tool_id": "a::no_such_tool", "arguments": {}}),
            None,
        )
        .await;
    assert_eq!(unknown["error"]["code"], json!("ToolNotFound"));
}

#[tokio::test]
async fn test_invoke_output_is_size_capped() {
    let policy = r#"
limits:
  max_output_bytes: 50
"#;
    let fx = fixture(&[("a", HELLO_SERVER)], Some(policy)).await;

    let invoke = fx
        .tools
        .handle_tool_call(
            "invoke",
            &json!({"tool_id": "a::hello", "arguments": {"name": "world"}}),
            None,
        )
        .await;
    assert_eq!(invoke["ok"], json!(true));
    assert_eq!(invoke["truncated"], json!(true));
    assert!(invoke["raw_size_estimate"].as_u64().unwrap() > 50);
    assert!(invoke["result"]["_truncated_at"].is_u64());
}

#[tokio::test]
async fn test_invoke_output_is_redacted() {
    let policy = r#"
redaction:
  patterns:
    - 'api_key=[^\s"]+'
"#;
    let fx = fixture(&[("leaky", LEAKY_SERVER)], Some(policy)).await;

    let invoke = fx
        .tools
        .handle_tool_call(
            "invoke",
            &json!({"tool_id": "leaky::tail_log", "arguments": {}}),
            None,
        )
        .await;
    assert_eq!(invoke["ok"], json!(true));
    assert_eq!(invoke["result"]["log"], json!("api_key=***"));
    let text = serde_json::to_string(&invoke).unwrap();
    assert!(!text.contains("secret123"));
}

#[tokio::test]
async fn test_provision_without_required_env_creates_no_job() {
    let fx = fixture(&[], None).await;
    std::env::remove_var("GITHUB_PERSONAL_ACCESS_TOKEN");

    let provision = fx
        .tools
        .handle_tool_call("provision", &json!({"server_name": "github"}), None)
        .await;
    assert_eq!(provision["ok"], json!(false));
    assert_eq!(provision["error"]["code"], json!("ProvisionFailed"));
    assert!(provision["error"]["message"]
        .as_str()
        .unwrap()
        .contains("GITHUB_PERSONAL_ACCESS_TOKEN"));

    let status = fx
        .tools
        .handle_tool_call("provision_status", &json!({"job_id": "anything"}), None)
        .await;
    assert_eq!(status["ok"], json!(false));
}

#[tokio::test]
async fn test_refresh_is_idempotent_on_unchanged_config() {
    let fx = fixture(&[("a", HELLO_SERVER)], None).await;

    let before = fx.tools.handle_tool_call("refresh", &json!({}), None).await;
    assert_eq!(before["ok"], json!(true));
    let tools_before = before["result"]["tools_indexed"].clone();

    let after = fx.tools.handle_tool_call("refresh", &json!({}), None).await;
    assert_eq!(after["result"]["tools_indexed"], tools_before);
    assert_eq!(after["result"]["servers_online"], json!(1));

    let search = fx
        .tools
        .handle_tool_call("catalog_search", &json!({}), None)
        .await;
    let ids: Vec<&str> = search["result"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["tool_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a::hello"]);
}

#[tokio::test]
async fn test_sync_environment_reports_platform() {
    let fx = fixture(&[], None).await;
    let env = fx
        .tools
        .handle_tool_call("sync_environment", &json!({}), None)
        .await;
    assert_eq!(env["ok"], json!(true));
    let platform = env["result"]["platform"].as_str().unwrap();
    assert!(["mac", "linux", "wsl", "windows"].contains(&platform));
    assert!(env["result"]["detected_clis"].is_array());
}

#[tokio::test]
async fn test_request_capability_recommends_provisionable_server() {
    let fx = fixture(&[], None).await;
    let out = fx
        .tools
        .handle_tool_call(
            "request_capability",
            &json!({"query": "browser automation screenshots"}),
            None,
        )
        .await;
    assert_eq!(out["ok"], json!(true));
    let candidates = out["result"]["candidates"].as_array().unwrap();
    assert!(!candidates.is_empty());
    assert_eq!(candidates[0]["name"], json!("playwright"));
    assert_eq!(candidates[0]["candidate_type"], json!("server_manifest"));
    assert!(out["result"]["recommendation"]
        .as_str()
        .unwrap()
        .contains("playwright"));
}

#[tokio::test]
async fn test_unknown_meta_tool_is_an_error_envelope() {
    let fx = fixture(&[], None).await;
    let out = fx
        .tools
        .handle_tool_call("summon_demon", &json!({}), None)
        .await;
    assert_eq!(out["ok"], json!(false));
    assert_eq!(out["error"]["code"], json!("ToolNotFound"));
}

#[tokio::test]
async fn test_every_card_describes_cleanly() {
    // Invariant: every card from catalog_search must describe() without
    // ToolNotFound.
    let fx = fixture(&[("a", HELLO_SERVER), ("leaky", LEAKY_SERVER)], None).await;
    let search = fx
        .tools
        .handle_tool_call("catalog_search", &json!({}), None)
        .await;
    let cards = search["result"]["results"].as_array().unwrap().clone();
    assert!(!cards.is_empty());
    for card in cards {
        let tool_id = card["tool_id"].as_str().unwrap();
        let describe: Value = fx
            .tools
            .handle_tool_call("describe", &json!({"tool_id": tool_id}), None)
            .await;
        assert_eq!(describe["ok"], json!(true), "describe failed for {}", tool_id);
    }
}
