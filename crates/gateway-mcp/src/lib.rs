//! The upstream MCP surface of the gateway: catalog registry, capability
//! matcher, provisioner, the meta-tool dispatcher, and the stdio server.

pub mod catalog;
pub mod dispatcher;
pub mod matcher;
pub mod provision;
pub mod server;
pub mod validator;

pub use catalog::{
    Availability, CatalogRegistry, CatalogSnapshot, PromptEntry, ResourceEntry, RiskHint,
    SearchOutput, ToolCard, ToolSchema,
};
pub use dispatcher::{meta_tool_definitions, GatewayTools, SEARCH_LIMIT_MAX};
pub use matcher::{Candidate, CandidateType, CapabilityMatcher, LexicalScorer, RelevanceScorer};
pub use provision::{JobState, ProvisionJob, Provisioner, SharedPolicy, JOB_RETENTION};
pub use server::{GatewayServer, UpstreamRequest, UpstreamResponse};
pub use validator::validate_arguments;
