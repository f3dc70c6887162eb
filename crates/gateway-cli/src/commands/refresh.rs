//! `refresh`: one-shot reconnect and report.
//!
//! Loads config and policy the same way serve does, starts the (scoped)
//! sessions without retries, prints what came up, and exits. Useful for
//! verifying config changes before restarting a long-running gateway.

use gateway_core::{load_server_specs, ConfigPaths, GatewayError};
use gateway_policy::Policy;
use gateway_session::{RetryPolicy, SessionManager, SessionState};
use std::path::PathBuf;

use super::{EXIT_CONFIG, EXIT_DOWNSTREAM};

pub async fn run(
    config: &Option<PathBuf>,
    project: &Option<PathBuf>,
    policy: &Option<PathBuf>,
    server: Option<&str>,
    force: bool,
) -> i32 {
    let paths = ConfigPaths::discover(config.clone(), project.clone());
    let policy_path = policy
        .clone()
        .or_else(|| std::env::var_os("MCP_GATEWAY_POLICY").map(PathBuf::from));

    let policy = match Policy::load(policy_path.as_deref()) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("policy error: {}", e);
            return EXIT_CONFIG;
        }
    };
    let specs = match load_server_specs(&paths) {
        Ok(specs) => specs,
        Err(e @ GatewayError::ConfigInvalid(_)) => {
            eprintln!("config error: {}", e);
            return EXIT_CONFIG;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };

    let scoped: Vec<_> = specs
        .into_iter()
        .filter(|s| server.map(|name| s.name == name).unwrap_or(true))
        .filter(|s| policy.is_server_allowed(&s.name))
        .collect();
    if scoped.is_empty() {
        eprintln!("no matching servers in configuration");
        return EXIT_CONFIG;
    }
    // One-shot refresh always starts from scratch, so force only changes
    // the message, not the behavior.
    if force {
        println!("forcing restart of {} server(s)", scoped.len());
    }

    let (manager, _notifications) = SessionManager::new(RetryPolicy::none());
    let errors = manager.start_all(scoped).await;

    for status in manager.statuses().await {
        let session = manager.get(&status.name).await;
        let tools = match (&session, status.state) {
            (Some(session), SessionState::Ready) => match session.list_tools().await {
                Ok(tools) => tools.len(),
                Err(_) => 0,
            },
            _ => 0,
        };
        println!(
            "{:<20} {:<10} {:>3} tools{}",
            status.name,
            status.state.as_str(),
            tools,
            status
                .last_error
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }

    manager.shutdown().await;
    if errors.is_empty() {
        0
    } else {
        EXIT_DOWNSTREAM
    }
}
