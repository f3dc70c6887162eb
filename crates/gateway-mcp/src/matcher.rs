//! Capability matching: rank manifest entries and running servers against
//! a free-text query.
//!
//! The default scorer is deterministic token overlap. Anything smarter
//! (an LLM-backed ranker, say) drops in behind [`RelevanceScorer`].

use async_trait::async_trait;
use gateway_core::Manifest;
use gateway_session::SessionState;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::catalog::CatalogSnapshot;

/// Bonus for candidates that are already running.
const RUNNING_BONUS: f64 = 0.1;
/// Bonus for manifest candidates whose required env var is already set.
const ENV_READY_BONUS: f64 = 0.05;

/// What kind of thing a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateType {
    ServerRunning,
    ServerManifest,
    Tool,
}

/// One ranked capability candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub name: String,
    pub candidate_type: CandidateType,
    pub relevance_score: f64,
    pub is_running: bool,
    pub requires_api_key: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

/// The text fields a scorer sees for one candidate.
pub struct CandidateFields<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub tags: &'a [String],
}

/// Pluggable relevance scoring. Implementations must be deterministic per
/// (query, fields) pair or ranking becomes unstable across calls.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn relevance(&self, query: &str, fields: CandidateFields<'_>) -> f64;
}

/// Token-overlap scoring: |query tokens matched| / |query tokens|.
pub struct LexicalScorer;

#[async_trait]
impl RelevanceScorer for LexicalScorer {
    async fn relevance(&self, query: &str, fields: CandidateFields<'_>) -> f64 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let mut haystack = tokenize(fields.name);
        haystack.extend(tokenize(fields.description));
        for tag in fields.tags {
            haystack.extend(tokenize(tag));
        }
        let matched = query_tokens
            .iter()
            .filter(|t| haystack.contains(*t))
            .count();
        matched as f64 / query_tokens.len() as f64
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Matches queries against the manifest and the live catalog.
pub struct CapabilityMatcher {
    manifest: Manifest,
    scorer: Box<dyn RelevanceScorer>,
}

impl CapabilityMatcher {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            scorer: Box::new(LexicalScorer),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Rank everything that could satisfy `query`: running servers,
    /// manifest entries, and individual catalog tools.
    pub async fn rank(
        &self,
        query: &str,
        server_states: &HashMap<String, SessionState>,
        catalog: &CatalogSnapshot,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for (name, entry) in &self.manifest.servers {
            let running = matches!(
                server_states.get(name),
                Some(SessionState::Ready | SessionState::Degraded)
            );
            let base = self
                .scorer
                .relevance(
                    query,
                    CandidateFields {
                        name,
                        description: &entry.description,
                        tags: &entry.keywords,
                    },
                )
                .await;
            let mut score = base;
            if running {
                score += RUNNING_BONUS;
            } else if entry.check_env().is_ok() {
                score += ENV_READY_BONUS;
            }
            candidates.push(Candidate {
                name: name.clone(),
                candidate_type: if running {
                    CandidateType::ServerRunning
                } else {
                    CandidateType::ServerManifest
                },
                relevance_score: score.min(1.0),
                is_running: running,
                requires_api_key: entry.requires_api_key,
                description: entry.description.clone(),
                install_hint: (!running).then(|| {
                    format!("provision({{\"server_name\": \"{}\"}}) installs and starts it", name)
                }),
            });
        }

        // Running servers that are not in the manifest still count.
        for (name, state) in server_states {
            if self.manifest.servers.contains_key(name) {
                continue;
            }
            if !matches!(state, SessionState::Ready | SessionState::Degraded) {
                continue;
            }
            let base = self
                .scorer
                .relevance(
                    query,
                    CandidateFields {
                        name,
                        description: "",
                        tags: &[],
                    },
                )
                .await;
            candidates.push(Candidate {
                name: name.clone(),
                candidate_type: CandidateType::ServerRunning,
                relevance_score: (base + RUNNING_BONUS).min(1.0),
                is_running: true,
                requires_api_key: false,
                description: String::new(),
                install_hint: None,
            });
        }

        for card in catalog.cards() {
            let base = self
                .scorer
                .relevance(
                    query,
                    CandidateFields {
                        name: &card.tool_name,
                        description: &card.short_description,
                        tags: &card.tags,
                    },
                )
                .await;
            if base <= 0.0 {
                continue;
            }
            candidates.push(Candidate {
                name: card.tool_id.clone(),
                candidate_type: CandidateType::Tool,
                relevance_score: (base + RUNNING_BONUS).min(1.0),
                is_running: true,
                requires_api_key: false,
                description: card.short_description.clone(),
                install_hint: None,
            });
        }

        candidates.retain(|c| c.relevance_score > 0.0);
        candidates.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates
    }

    /// CLI alternatives on PATH that match the query, best first.
    pub async fn matching_clis(&self, query: &str, detected: &[String]) -> Vec<(String, f64)> {
        let mut hits = Vec::new();
        for name in detected {
            if let Some(cli) = self.manifest.get_cli(name) {
                let score = self
                    .scorer
                    .relevance(
                        query,
                        CandidateFields {
                            name: &cli.name,
                            description: &cli.description,
                            tags: &cli.keywords,
                        },
                    )
                    .await;
                if score > 0.0 {
                    hits.push((cli.name.clone(), score));
                }
            }
        }
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSnapshot;

    fn manifest() -> Manifest {
        Manifest::load().unwrap()
    }

    #[tokio::test]
    async fn test_lexical_scorer_overlap() {
        let scorer = LexicalScorer;
        let fields = CandidateFields {
            name: "playwright",
            description: "Browser automation and screenshots",
            tags: &[],
        };
        let full = scorer.relevance("browser automation", fields).await;
        assert!((full - 1.0).abs() < f64::EPSILON);

        let fields = CandidateFields {
            name: "playwright",
            description: "Browser automation and screenshots",
            tags: &[],
        };
        let half = scorer.relevance("browser databases", fields).await;
        assert!((half - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rank_prefers_running_server() {
        let matcher = CapabilityMatcher::new(manifest());
        let mut states = HashMap::new();
        states.insert("playwright".to_string(), SessionState::Ready);

        let catalog = CatalogSnapshot::default();
        let ranked = matcher.rank("browser automation", &states, &catalog).await;
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].name, "playwright");
        assert_eq!(ranked[0].candidate_type, CandidateType::ServerRunning);
        assert!(ranked[0].is_running);
    }

    #[tokio::test]
    async fn test_rank_manifest_candidate_carries_install_hint() {
        let matcher = CapabilityMatcher::new(manifest());
        let states = HashMap::new();
        let catalog = CatalogSnapshot::default();

        let ranked = matcher.rank("github issues", &states, &catalog).await;
        let github = ranked.iter().find(|c| c.name == "github").unwrap();
        assert_eq!(github.candidate_type, CandidateType::ServerManifest);
        assert!(github.requires_api_key);
        assert!(github.install_hint.is_some());
    }

    #[tokio::test]
    async fn test_rank_drops_irrelevant() {
        let matcher = CapabilityMatcher::new(manifest());
        let states = HashMap::new();
        let catalog = CatalogSnapshot::default();

        let ranked = matcher
            .rank("quantum chromodynamics solver", &states, &catalog)
            .await;
        assert!(ranked.is_empty());
    }
}
