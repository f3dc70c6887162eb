//! The nine meta-tools exposed upstream, and the machinery behind them.
//!
//! Every handler returns a JSON envelope `{ok, result?|error?, truncated?,
//! raw_size_estimate?}`. Policy output processing (redaction, size cap) is
//! applied to the envelope's result last, after aggregation, and a handler
//! error always becomes an error envelope rather than a transport failure.

use gateway_core::{
    load_server_specs, parse_tool_id, ConfigPaths, GatewayError, Manifest, Platform, Result,
    ServerSpec,
};
use gateway_policy::Policy;
use gateway_session::{RetryPolicy, ServerNotification, SessionManager, SessionState};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::catalog::CatalogRegistry;
use crate::matcher::{CapabilityMatcher, CandidateType};
use crate::provision::{Provisioner, SharedPolicy};
use crate::validator::validate_arguments;

/// Upper bound on `catalog_search` page size.
pub const SEARCH_LIMIT_MAX: usize = 50;
const SEARCH_LIMIT_DEFAULT: usize = 20;

/// An in-flight `invoke`, tracked so upstream cancellation can reach the
/// owning session.
struct InflightInvoke {
    server: String,
    local_id: Arc<OnceLock<u64>>,
}

/// The dispatcher: owns every subsystem behind the meta-tool surface.
pub struct GatewayTools {
    manager: Arc<SessionManager>,
    catalog: Arc<CatalogRegistry>,
    policy: SharedPolicy,
    provisioner: Arc<Provisioner>,
    matcher: CapabilityMatcher,
    config_paths: ConfigPaths,
    policy_path: Option<PathBuf>,
    inflight: StdMutex<HashMap<String, InflightInvoke>>,
    /// Serializes refresh against itself; reads keep using the prior
    /// catalog snapshot meanwhile.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl GatewayTools {
    /// Load config and policy, start every allowed session, build the
    /// first catalog snapshot, and return the ready dispatcher plus the
    /// downstream notification stream.
    pub async fn bootstrap(
        config_paths: ConfigPaths,
        policy_path: Option<PathBuf>,
        retry: RetryPolicy,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ServerNotification>)> {
        let policy = Arc::new(Policy::load(policy_path.as_deref())?);
        let specs = load_server_specs(&config_paths)?;
        let allowed: Vec<ServerSpec> = specs
            .into_iter()
            .filter(|spec| {
                let allowed = policy.is_server_allowed(&spec.name);
                if !allowed {
                    info!(server = %spec.name, "server blocked by policy");
                }
                allowed
            })
            .collect();

        let (manager, notify_rx) = SessionManager::new(retry);
        let errors = manager.start_all(allowed).await;
        for (server, e) in &errors {
            warn!(server = %server, error = %e, "server failed to start");
        }

        let catalog = Arc::new(CatalogRegistry::new());
        catalog.rebuild(&manager, &policy).await;

        let shared_policy: SharedPolicy = Arc::new(RwLock::new(policy));
        let manifest = Manifest::load()?;
        let provisioner = Arc::new(Provisioner::new(
            manifest.clone(),
            manager.clone(),
            catalog.clone(),
            shared_policy.clone(),
        ));

        Ok((
            Arc::new(Self {
                manager,
                catalog,
                policy: shared_policy,
                provisioner,
                matcher: CapabilityMatcher::new(manifest),
                config_paths,
                policy_path,
                inflight: StdMutex::new(HashMap::new()),
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
            notify_rx,
        ))
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn catalog(&self) -> &Arc<CatalogRegistry> {
        &self.catalog
    }

    fn current_policy(&self) -> Arc<Policy> {
        self.policy.read().expect("policy lock").clone()
    }

    /// The current policy snapshot, for callers outside the dispatcher.
    pub fn policy_snapshot(&self) -> Arc<Policy> {
        self.current_policy()
    }

    /// Dispatch one meta-tool call and shape the result into an envelope.
    pub async fn handle_tool_call(
        &self,
        name: &str,
        arguments: &Value,
        upstream_id: Option<&Value>,
    ) -> Value {
        let result = match name {
            "catalog_search" => self.catalog_search(arguments),
            "describe" => self.describe(arguments),
            "invoke" => self.invoke(arguments, upstream_id).await,
            "refresh" => self.refresh(arguments).await,
            "health" => self.health().await,
            "request_capability" => self.request_capability(arguments).await,
            "sync_environment" => Ok(self.sync_environment()),
            "provision" => self.provision(arguments),
            "provision_status" => self.provision_status(arguments),
            other => Err(GatewayError::ToolNotFound {
                tool_id: other.to_string(),
            }),
        };
        self.envelope(result)
    }

    fn envelope(&self, result: Result<Value>) -> Value {
        match result {
            Ok(value) => {
                let capped = self.current_policy().process_output(&value);
                json!({
                    "ok": true,
                    "result": capped.result,
                    "truncated": capped.truncated,
                    "raw_size_estimate": capped.raw_size_estimate,
                })
            }
            Err(e) => {
                match &e {
                    GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Internal(_) => {
                        error!(error = %e, "dispatcher error")
                    }
                    _ => info!(error = %e, "request rejected"),
                }
                json!({
                    "ok": false,
                    "error": {"code": e.code(), "message": e.upstream_message()},
                })
            }
        }
    }

    fn catalog_search(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            #[serde(default)]
            query: Option<String>,
            #[serde(default)]
            limit: Option<usize>,
        }
        let input: Input = parse_input(arguments)?;
        let limit = input
            .limit
            .unwrap_or(SEARCH_LIMIT_DEFAULT)
            .clamp(1, SEARCH_LIMIT_MAX);

        let snapshot = self.catalog.snapshot();
        let output = snapshot.search(input.query.as_deref().unwrap_or(""), limit);
        Ok(serde_json::to_value(output)?)
    }

    fn describe(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            tool_id: String,
        }
        let input: Input = parse_input(arguments)?;
        parse_tool_id(&input.tool_id)?;

        let snapshot = self.catalog.snapshot();
        let schema = snapshot.describe(&input.tool_id)?;
        Ok(serde_json::to_value(schema)?)
    }

    async fn invoke(&self, arguments: &Value, upstream_id: Option<&Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            tool_id: String,
            #[serde(default)]
            arguments: Value,
        }
        let input: Input = parse_input(arguments)?;
        let (server, tool_name) = {
            let (server, tool) = parse_tool_id(&input.tool_id)?;
            (server.to_string(), tool.to_string())
        };

        let schema = {
            let snapshot = self.catalog.snapshot();
            snapshot.describe(&input.tool_id)?.input_schema.clone()
        };
        let validated = validate_arguments(&input.tool_id, &schema, &input.arguments)?;

        let session =
            self.manager
                .get(&server)
                .await
                .ok_or_else(|| GatewayError::SessionClosed {
                    server: server.clone(),
                    reason: "server is not running".to_string(),
                })?;

        // Track the downstream request id so an upstream cancel can reach it.
        let local_id = Arc::new(OnceLock::new());
        let inflight_key = upstream_id.map(|id| id.to_string());
        if let Some(key) = &inflight_key {
            self.inflight.lock().expect("inflight lock").insert(
                key.clone(),
                InflightInvoke {
                    server: server.clone(),
                    local_id: local_id.clone(),
                },
            );
        }

        let outcome = session
            .call_tool_tracked(&tool_name, validated, None, &local_id)
            .await;

        if let Some(key) = &inflight_key {
            self.inflight.lock().expect("inflight lock").remove(key);
        }
        outcome
    }

    /// Propagate an upstream `notifications/cancelled` to the owning
    /// session. The pending entry is failed locally right away.
    pub async fn cancel_upstream(&self, upstream_id: &Value) {
        let entry = {
            let inflight = self.inflight.lock().expect("inflight lock");
            inflight
                .get(&upstream_id.to_string())
                .map(|e| (e.server.clone(), e.local_id.clone()))
        };
        let Some((server, local_id)) = entry else {
            return;
        };
        let Some(local_id) = local_id.get().copied() else {
            return;
        };
        if let Some(session) = self.manager.get(&server).await {
            let outcome = session.cancel(local_id, true).await;
            info!(server = %server, request = local_id, ?outcome, "upstream cancel propagated");
        }
    }

    async fn refresh(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            #[serde(default)]
            server: Option<String>,
            #[serde(default)]
            force: bool,
        }
        let input: Input = parse_input(arguments)?;
        let _guard = self.refresh_lock.lock().await;

        // Reload policy first; a broken policy file fails the refresh
        // without touching running sessions.
        let policy = Arc::new(Policy::load(self.policy_path.as_deref())?);
        let specs = load_server_specs(&self.config_paths)?;
        let servers_seen = specs.len();
        let allowed: Vec<ServerSpec> = specs
            .into_iter()
            .filter(|s| policy.is_server_allowed(&s.name))
            .collect();

        let errors = match &input.server {
            Some(name) => {
                let spec = allowed.iter().find(|s| &s.name == name).cloned();
                self.manager.refresh_one(name, spec, input.force).await
            }
            None => self.manager.refresh(allowed, input.force).await,
        };

        *self.policy.write().expect("policy lock") = policy.clone();
        self.catalog.rebuild(&self.manager, &policy).await;

        let snapshot = self.catalog.snapshot();
        let states = self.manager.server_states().await;
        let online = states
            .values()
            .filter(|s| matches!(s, SessionState::Ready))
            .count();
        Ok(json!({
            "ok": errors.is_empty(),
            "servers_seen": servers_seen,
            "servers_online": online,
            "tools_indexed": snapshot.tool_count(),
            "revision_id": snapshot.revision_id,
            "errors": errors
                .iter()
                .map(|(name, e)| format!("{}: {}", name, e))
                .collect::<Vec<_>>(),
        }))
    }

    async fn health(&self) -> Result<Value> {
        let snapshot = self.catalog.snapshot();
        let statuses = self.manager.statuses().await;
        Ok(json!({
            "revision_id": snapshot.revision_id,
            "last_refresh_ts": snapshot.last_refresh_ts,
            "servers": statuses
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "state": s.state.as_str(),
                        "last_error": s.last_error,
                        "tool_count": snapshot.tool_count_for(&s.name),
                        "pending_requests": s.pending_requests,
                        "retry_count": s.retry_count,
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }

    async fn request_capability(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            query: String,
            #[serde(default)]
            prefer_cli: bool,
        }
        let input: Input = parse_input(arguments)?;

        let states = self.manager.server_states().await;
        let snapshot = self.catalog.snapshot();
        let candidates = self.matcher.rank(&input.query, &states, &snapshot).await;

        let detected_clis = self.matcher.manifest().probe_clis();
        let cli_matches = if input.prefer_cli {
            self.matcher.matching_clis(&input.query, &detected_clis).await
        } else {
            Vec::new()
        };

        let recommendation = if let Some((cli, _)) = cli_matches.first() {
            format!(
                "The '{}' CLI is already installed and covers this; prefer it over provisioning a server.",
                cli
            )
        } else if let Some(best) = candidates.first() {
            match best.candidate_type {
                CandidateType::ServerRunning => format!(
                    "Server '{}' is already running; use catalog_search and invoke its tools.",
                    best.name
                ),
                CandidateType::Tool => format!(
                    "Tool '{}' looks relevant; describe it and then invoke.",
                    best.name
                ),
                CandidateType::ServerManifest => {
                    if best.requires_api_key {
                        format!(
                            "Server '{}' can be provisioned but needs an API key first.",
                            best.name
                        )
                    } else {
                        format!("Server '{}' can be provisioned on demand.", best.name)
                    }
                }
            }
        } else {
            "No matching capability found; try a broader query.".to_string()
        };

        Ok(json!({
            "candidates": candidates,
            "recommendation": recommendation,
            "cli_matches": cli_matches
                .iter()
                .map(|(name, score)| json!({"name": name, "relevance_score": score}))
                .collect::<Vec<_>>(),
        }))
    }

    fn sync_environment(&self) -> Value {
        let platform = Platform::detect();
        json!({
            "platform": platform.as_str(),
            "detected_clis": self.matcher.manifest().probe_clis(),
        })
    }

    fn provision(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            server_name: String,
            #[serde(default)]
            env: HashMap<String, String>,
        }
        let input: Input = parse_input(arguments)?;
        let job_id = self
            .provisioner
            .clone()
            .provision(&input.server_name, input.env)?;
        Ok(json!({"job_id": job_id}))
    }

    fn provision_status(&self, arguments: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Input {
            job_id: String,
        }
        let input: Input = parse_input(arguments)?;
        let job = self
            .provisioner
            .status(&input.job_id)
            .ok_or_else(|| GatewayError::InvalidArgument {
                tool_id: input.job_id.clone(),
                reason: "unknown or expired job id".to_string(),
            })?;
        Ok(serde_json::to_value(job)?)
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone()).map_err(|e| GatewayError::InvalidArgument {
        tool_id: "meta-tool".to_string(),
        reason: e.to_string(),
    })
}

/// MCP tool definitions for the nine meta-tools, in `tools/list` shape.
pub fn meta_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "catalog_search",
            "description": "Search for available tools across all connected MCP servers. Returns compact capability cards without full schemas.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Matched against tool names, descriptions, and tags"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": SEARCH_LIMIT_MAX, "default": SEARCH_LIMIT_DEFAULT},
                },
            },
        }),
        json!({
            "name": "describe",
            "description": "Get the full schema for one tool before invoking it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": {"type": "string", "description": "Tool id in the form server::tool"},
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "invoke",
            "description": "Invoke a tool on a downstream MCP server. Arguments are validated against the tool schema; output is size-capped and redacted.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": {"type": "string", "description": "Tool id in the form server::tool"},
                    "arguments": {"type": "object", "description": "Arguments matching the tool's input schema"},
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "refresh",
            "description": "Reload configuration and policy, reconcile sessions, and rebuild the catalog.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Limit the refresh to one server"},
                    "force": {"type": "boolean", "default": false},
                },
            },
        }),
        json!({
            "name": "health",
            "description": "Per-server state, last errors, tool counts, and the catalog revision.",
            "inputSchema": {"type": "object", "properties": {}},
        }),
        json!({
            "name": "request_capability",
            "description": "Rank running servers, provisionable servers, and tools against a natural-language need.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What capability is needed"},
                    "prefer_cli": {"type": "boolean", "default": false},
                },
                "required": ["query"],
            },
        }),
        json!({
            "name": "sync_environment",
            "description": "Report the host platform and which CLI tools from the manifest probe list are installed.",
            "inputSchema": {"type": "object", "properties": {}},
        }),
        json!({
            "name": "provision",
            "description": "Start an asynchronous install job for a server from the manifest. Returns a job_id to poll.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_name": {"type": "string"},
                    "env": {"type": "object", "description": "Environment variables for the new server"},
                },
                "required": ["server_name"],
            },
        }),
        json!({
            "name": "provision_status",
            "description": "Poll the progress of a provisioning job.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "job_id": {"type": "string"},
                },
                "required": ["job_id"],
            },
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nine_meta_tools() {
        let defs = meta_tool_definitions();
        assert_eq!(defs.len(), 9);
        let names: Vec<&str> = defs
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "catalog_search",
                "describe",
                "invoke",
                "refresh",
                "health",
                "request_capability",
                "sync_environment",
                "provision",
                "provision_status",
            ]
        );
        for def in &defs {
            assert!(def["inputSchema"]["type"].as_str() == Some("object"));
        }
    }
}
