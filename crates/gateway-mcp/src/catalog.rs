//! The catalog registry: policy-filtered indexes of tools, resources, and
//! prompts across all sessions.
//!
//! Rebuilds produce an immutable snapshot that is swapped in atomically, so
//! every search sees an internally consistent catalog. Entries from servers
//! that left the `ready` state are kept, marked offline, until the next
//! successful inventory fetch replaces them.

use gateway_core::{make_tool_id, GatewayError, Result};
use gateway_policy::Policy;
use gateway_session::{SessionManager, SessionState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Hard cap on a card's short description.
pub const SHORT_DESCRIPTION_MAX: usize = 140;

/// Risk level hint inferred from a tool's name and description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskHint {
    Low,
    Medium,
    High,
    Unknown,
}

/// Whether the owning server is currently serving calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

/// Compact tool descriptor returned by `catalog_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCard {
    pub tool_id: String,
    pub server: String,
    pub tool_name: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub availability: Availability,
    pub risk_hint: RiskHint,
}

/// Full tool definition returned by `describe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub tool_id: String,
    pub server: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub safety_notes: Vec<String>,
}

/// A proxied resource entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Namespaced id `<server>::<uri>`.
    pub resource_id: String,
    pub server: String,
    pub uri: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub availability: Availability,
}

/// A proxied prompt entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    /// Namespaced id `<server>::<name>`.
    pub prompt_id: String,
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub arguments: Option<Value>,
    pub availability: Availability,
}

/// One tool as stored in the catalog: card plus full schema.
#[derive(Debug, Clone)]
struct ToolRecord {
    card: ToolCard,
    schema: ToolSchema,
}

/// Immutable catalog snapshot. Built by one rebuild, read by many searches.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    tools: Vec<Arc<ToolRecord>>,
    resources: Vec<ResourceEntry>,
    prompts: Vec<PromptEntry>,
    /// Tool ids that exist downstream but are blocked by policy. Needed so
    /// `describe` can answer `ToolDenied` rather than `ToolNotFound`.
    denied_tools: HashSet<String>,
    pub revision_id: String,
    pub last_refresh_ts: i64,
}

/// Result page for `catalog_search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: Vec<ToolCard>,
    pub total_available: usize,
    pub truncated: bool,
}

/// The registry: holds the current snapshot and rebuilds it from sessions.
pub struct CatalogRegistry {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    /// Serializes rebuilds against each other, never against readers.
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl Default for CatalogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CatalogSnapshot {
                revision_id: new_revision_id(),
                last_refresh_ts: chrono::Utc::now().timestamp(),
                ..Default::default()
            })),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The current snapshot. Lock-free for practical purposes: readers
    /// clone an `Arc` under a briefly-held lock.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().expect("snapshot lock").clone()
    }

    /// Pull inventories from every active session and swap in a new
    /// snapshot. Entries of servers that are no longer ready survive from
    /// the previous snapshot, marked offline.
    pub async fn rebuild(&self, manager: &SessionManager, policy: &Policy) {
        let _guard = self.rebuild_lock.lock().await;
        let previous = self.snapshot();

        let states = manager.server_states().await;
        let max_tools = policy.limits().max_tools_per_server;

        let mut tools: Vec<Arc<ToolRecord>> = Vec::new();
        let mut resources: Vec<ResourceEntry> = Vec::new();
        let mut prompts: Vec<PromptEntry> = Vec::new();
        let mut denied_tools: HashSet<String> = HashSet::new();
        let mut rebuilt_servers: HashSet<String> = HashSet::new();

        for session in manager.active_sessions().await {
            let server = session.name().to_string();
            if !policy.is_server_allowed(&server) {
                rebuilt_servers.insert(server);
                continue;
            }

            // Ready sessions fetch live; degraded sessions reuse the cache
            // from their last successful fetch.
            let inventory = match session.state() {
                SessionState::Ready => match session.refresh_inventory().await {
                    Ok(inventory) => inventory,
                    Err(_) => session.cached_inventory(),
                },
                _ => session.cached_inventory(),
            };
            let availability = availability_of(states.get(&server).copied());
            rebuilt_servers.insert(server.clone());

            let mut kept = 0usize;
            for descriptor in inventory.tools {
                if kept >= max_tools {
                    debug!(server = %server, cap = max_tools, "per-server tool cap reached");
                    break;
                }
                kept += 1;
                let tool_id = make_tool_id(&server, &descriptor.name);
                if !policy.is_tool_allowed(&server, &tool_id) {
                    denied_tools.insert(tool_id);
                    continue;
                }
                let description = descriptor.description.clone().unwrap_or_default();
                let record = ToolRecord {
                    card: ToolCard {
                        tool_id: tool_id.clone(),
                        server: server.clone(),
                        tool_name: descriptor.name.clone(),
                        short_description: short_description(&description),
                        tags: extract_tags(&server, &descriptor.name, &description),
                        availability,
                        risk_hint: infer_risk_hint(&descriptor.name, &description),
                    },
                    schema: ToolSchema {
                        tool_id,
                        server: server.clone(),
                        tool_name: descriptor.name,
                        description,
                        input_schema: descriptor.input_schema,
                        safety_notes: Vec::new(),
                    },
                };
                tools.push(Arc::new(record));
            }

            for descriptor in inventory.resources {
                let resource_id = make_tool_id(&server, &descriptor.uri);
                if !policy.is_resource_allowed(&server, &descriptor.uri) {
                    continue;
                }
                resources.push(ResourceEntry {
                    resource_id,
                    server: server.clone(),
                    uri: descriptor.uri,
                    name: descriptor.name,
                    description: descriptor.description,
                    mime_type: descriptor.mime_type,
                    availability,
                });
            }

            for descriptor in inventory.prompts {
                let prompt_id = make_tool_id(&server, &descriptor.name);
                if !policy.is_prompt_allowed(&server, &descriptor.name) {
                    continue;
                }
                prompts.push(PromptEntry {
                    prompt_id,
                    server: server.clone(),
                    name: descriptor.name,
                    description: descriptor.description,
                    arguments: descriptor.arguments,
                    availability,
                });
            }
        }

        // Servers still registered but not currently active keep their old
        // entries, marked offline, until a successful fetch replaces them.
        for record in &previous.tools {
            let server = &record.card.server;
            if rebuilt_servers.contains(server) || !states.contains_key(server) {
                continue;
            }
            if !policy.is_tool_allowed(server, &record.card.tool_id) {
                denied_tools.insert(record.card.tool_id.clone());
                continue;
            }
            let mut stale = ToolRecord {
                card: record.card.clone(),
                schema: record.schema.clone(),
            };
            stale.card.availability = Availability::Offline;
            tools.push(Arc::new(stale));
        }

        tools.sort_by(|a, b| {
            (a.card.server.as_str(), a.card.tool_name.as_str())
                .cmp(&(b.card.server.as_str(), b.card.tool_name.as_str()))
        });
        resources.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        prompts.sort_by(|a, b| a.prompt_id.cmp(&b.prompt_id));

        let next = CatalogSnapshot {
            tools,
            resources,
            prompts,
            denied_tools,
            revision_id: new_revision_id(),
            last_refresh_ts: chrono::Utc::now().timestamp(),
        };
        info!(
            revision = %next.revision_id,
            tools = next.tools.len(),
            resources = next.resources.len(),
            prompts = next.prompts.len(),
            "catalog rebuilt"
        );
        *self.snapshot.write().expect("snapshot lock") = Arc::new(next);
    }
}

impl CatalogSnapshot {
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn tool_count_for(&self, server: &str) -> usize {
        self.tools.iter().filter(|t| t.card.server == server).count()
    }

    pub fn resources(&self) -> &[ResourceEntry] {
        &self.resources
    }

    pub fn prompts(&self) -> &[PromptEntry] {
        &self.prompts
    }

    pub fn cards(&self) -> impl Iterator<Item = &ToolCard> {
        self.tools.iter().map(|record| &record.card)
    }

    /// Full schema lookup honoring the deny set.
    pub fn describe(&self, tool_id: &str) -> Result<&ToolSchema> {
        if let Some(record) = self.tools.iter().find(|t| t.card.tool_id == tool_id) {
            return Ok(&record.schema);
        }
        if self.denied_tools.contains(tool_id) {
            return Err(GatewayError::ToolDenied {
                tool_id: tool_id.to_string(),
            });
        }
        Err(GatewayError::ToolNotFound {
            tool_id: tool_id.to_string(),
        })
    }

    pub fn card(&self, tool_id: &str) -> Option<&ToolCard> {
        self.tools
            .iter()
            .find(|t| t.card.tool_id == tool_id)
            .map(|t| &t.card)
    }

    /// Lexical search over the catalog.
    ///
    /// Substring matches score: tool name x3, short description x2, tags
    /// x1. Ties break toward shorter tool names, then stable server/name
    /// order. An empty query lists everything in stable order.
    pub fn search(&self, query: &str, limit: usize) -> SearchOutput {
        let total_available = self.tools.len();
        let query = query.trim().to_lowercase();

        let matched: Vec<&ToolCard> = if query.is_empty() {
            self.cards().collect()
        } else {
            let mut scored: Vec<(u32, &ToolCard)> = self
                .cards()
                .filter_map(|card| {
                    let score = score_card(card, &query);
                    (score > 0).then_some((score, card))
                })
                .collect();
            scored.sort_by(|(score_a, card_a), (score_b, card_b)| {
                score_b
                    .cmp(score_a)
                    .then(card_a.tool_name.len().cmp(&card_b.tool_name.len()))
                    .then(card_a.server.cmp(&card_b.server))
                    .then(card_a.tool_name.cmp(&card_b.tool_name))
            });
            scored.into_iter().map(|(_, card)| card).collect()
        };

        let truncated = matched.len() > limit;
        SearchOutput {
            results: matched.into_iter().take(limit).cloned().collect(),
            total_available,
            truncated,
        }
    }
}

fn score_card(card: &ToolCard, query: &str) -> u32 {
    let mut score = 0;
    if card.tool_name.to_lowercase().contains(query) {
        score += 3;
    }
    if card.short_description.to_lowercase().contains(query) {
        score += 2;
    }
    if card.tags.iter().any(|t| t.to_lowercase().contains(query)) {
        score += 1;
    }
    score
}

fn availability_of(state: Option<SessionState>) -> Availability {
    match state {
        Some(SessionState::Ready) => Availability::Online,
        _ => Availability::Offline,
    }
}

fn new_revision_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("rev-{}-{}", millis, &suffix[..6])
}

/// First sentence of the description, hard-capped at
/// [`SHORT_DESCRIPTION_MAX`] characters with an ellipsis suffix.
pub fn short_description(description: &str) -> String {
    let trimmed = description.trim();
    let sentence = match trimmed.find(". ") {
        Some(idx) => &trimmed[..idx + 1],
        None => trimmed,
    };
    if sentence.chars().count() <= SHORT_DESCRIPTION_MAX {
        return sentence.to_string();
    }
    let cut: String = sentence.chars().take(SHORT_DESCRIPTION_MAX - 3).collect();
    format!("{}...", cut)
}

/// Keyword buckets used to tag tools for search.
const TAG_CATEGORIES: &[(&str, &[&str])] = &[
    ("database", &["db", "sql", "query", "table", "database"]),
    ("file", &["file", "directory", "folder", "path"]),
    ("git", &["git", "commit", "branch", "repository", "repo"]),
    ("http", &["http", "api", "request", "fetch", "url"]),
    ("search", &["search", "find", "grep", "filter"]),
    ("code", &["code", "function", "class", "symbol"]),
];

pub fn extract_tags(server: &str, tool_name: &str, description: &str) -> Vec<String> {
    let combined = format!("{} {}", tool_name, description).to_lowercase();
    let mut tags = vec![server.to_string()];
    for (category, keywords) in TAG_CATEGORIES {
        if keywords.iter().any(|k| combined.contains(k)) {
            tags.push((*category).to_string());
        }
    }
    tags
}

const LOW_RISK_VERBS: &[&str] = &["read", "get", "list", "search", "query", "fetch", "describe"];
const HIGH_RISK_VERBS: &[&str] = &[
    "delete", "remove", "drop", "execute", "run", "write", "create", "update", "modify", "send",
    "post", "put",
];

pub fn infer_risk_hint(tool_name: &str, description: &str) -> RiskHint {
    let combined = format!("{} {}", tool_name, description).to_lowercase();
    if HIGH_RISK_VERBS.iter().any(|v| combined.contains(v)) {
        return RiskHint::High;
    }
    if LOW_RISK_VERBS.iter().any(|v| combined.contains(v)) {
        return RiskHint::Low;
    }
    RiskHint::Medium
}

/// Internal map of server states, re-exported for the dispatcher's health
/// report.
pub type ServerStates = HashMap<String, SessionState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn card(server: &str, name: &str, desc: &str, tags: &[&str]) -> Arc<ToolRecord> {
        Arc::new(ToolRecord {
            card: ToolCard {
                tool_id: make_tool_id(server, name),
                server: server.to_string(),
                tool_name: name.to_string(),
                short_description: short_description(desc),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                availability: Availability::Online,
                risk_hint: infer_risk_hint(name, desc),
            },
            schema: ToolSchema {
                tool_id: make_tool_id(server, name),
                server: server.to_string(),
                tool_name: name.to_string(),
                description: desc.to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                safety_notes: Vec::new(),
            },
        })
    }

    fn snapshot(tools: Vec<Arc<ToolRecord>>) -> CatalogSnapshot {
        CatalogSnapshot {
            tools,
            resources: Vec::new(),
            prompts: Vec::new(),
            denied_tools: HashSet::new(),
            revision_id: "rev-test".to_string(),
            last_refresh_ts: 0,
        }
    }

    #[test]
    fn test_short_description_first_sentence() {
        let desc = "Reads a file. Also supports globbing across directories.";
        assert_eq!(short_description(desc), "Reads a file.");
    }

    #[test]
    fn test_short_description_hard_cap() {
        let desc = "x".repeat(400);
        let short = short_description(&desc);
        assert_eq!(short.chars().count(), SHORT_DESCRIPTION_MAX);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_risk_hints() {
        assert_eq!(infer_risk_hint("delete_repo", ""), RiskHint::High);
        assert_eq!(infer_risk_hint("list_issues", ""), RiskHint::Low);
        assert_eq!(infer_risk_hint("transmogrify", ""), RiskHint::Medium);
    }

    #[test]
    fn test_tags_include_server_and_categories() {
        let tags = extract_tags("github", "create_branch", "Create a git branch in a repository");
        assert!(tags.contains(&"github".to_string()));
        assert!(tags.contains(&"git".to_string()));
    }

    #[test]
    fn test_search_name_outranks_description() {
        let snap = snapshot(vec![
            card("a", "file_read", "Read a file from disk", &[]),
            card("b", "cat", "Print file contents to the file stream", &[]),
        ]);
        let out = snap.search("file", 10);
        assert_eq!(out.results[0].tool_name, "file_read");
        assert_eq!(out.results.len(), 2);
        assert!(!out.truncated);
    }

    #[test]
    fn test_search_empty_query_stable_order() {
        let snap = snapshot(vec![
            card("a", "beta", "", &[]),
            card("a", "alpha", "", &[]),
            card("b", "gamma", "", &[]),
        ]);
        // Snapshot construction keeps insertion order; rebuild sorts. Sort
        // here to mirror rebuild's contract.
        let mut tools = snap.tools.clone();
        tools.sort_by(|x, y| {
            (x.card.server.clone(), x.card.tool_name.clone())
                .cmp(&(y.card.server.clone(), y.card.tool_name.clone()))
        });
        let snap = snapshot(tools);

        let out = snap.search("", 2);
        let names: Vec<&str> = out.results.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(out.truncated);
        assert_eq!(out.total_available, 3);
    }

    #[test]
    fn test_describe_denied_vs_missing() {
        let mut snap = snapshot(vec![card("a", "hello", "greets", &[])]);
        snap.denied_tools.insert("a::secret_tool".to_string());

        assert!(snap.describe("a::hello").is_ok());
        assert_eq!(
            snap.describe("a::secret_tool").unwrap_err().code(),
            "ToolDenied"
        );
        assert_eq!(
            snap.describe("a::nonexistent").unwrap_err().code(),
            "ToolNotFound"
        );
    }
}
