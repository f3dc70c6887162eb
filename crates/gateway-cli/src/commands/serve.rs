//! The default command: run the gateway as an MCP server on stdio.

use gateway_core::{ConfigPaths, GatewayError};
use gateway_mcp::{GatewayServer, GatewayTools};
use gateway_session::RetryPolicy;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use super::{EXIT_CONFIG, EXIT_DOWNSTREAM, EXIT_INTERRUPT};

/// How often the status snapshot file is rewritten.
const STATUS_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Logs go to stderr so stdout stays clean for the MCP transport, teed
/// into the cache-dir log file when one can be opened.
fn setup_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = super::log_file().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match log_file {
        Some(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

pub async fn run(
    config: &Option<PathBuf>,
    project: &Option<PathBuf>,
    policy: &Option<PathBuf>,
    log_level: &str,
) -> i32 {
    setup_logging(log_level);

    let paths = ConfigPaths::discover(config.clone(), project.clone());
    let policy_path = policy
        .clone()
        .or_else(|| std::env::var_os("MCP_GATEWAY_POLICY").map(PathBuf::from));

    info!("starting mcp-gateway");
    let (tools, mut notify_rx) =
        match GatewayTools::bootstrap(paths, policy_path, RetryPolicy::default()).await {
            Ok(bootstrapped) => bootstrapped,
            Err(e @ GatewayError::ConfigInvalid(_)) => {
                eprintln!("configuration error: {}", e);
                return EXIT_CONFIG;
            }
            Err(e) => {
                eprintln!("startup failed: {}", e);
                return EXIT_DOWNSTREAM;
            }
        };

    // Downstream notifications: list changes trigger a catalog rebuild.
    {
        let tools = tools.clone();
        tokio::spawn(async move {
            while let Some(notification) = notify_rx.recv().await {
                debug!(
                    server = %notification.server,
                    method = %notification.method,
                    "downstream notification"
                );
                if notification.method.ends_with("list_changed") {
                    let policy = tools.policy_snapshot();
                    tools.catalog().rebuild(tools.manager(), &policy).await;
                }
            }
        });
    }

    // Periodic status snapshot for the `status` subcommand.
    {
        let tools = tools.clone();
        tokio::spawn(async move {
            loop {
                write_status_snapshot(&tools).await;
                tokio::time::sleep(STATUS_SNAPSHOT_INTERVAL).await;
            }
        });
    }

    let server = GatewayServer::new(tools.clone());
    let exit_code = tokio::select! {
        result = server.run() => match result {
            Ok(()) => 0,
            Err(e) => {
                warn!(error = %e, "server loop ended with error");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            EXIT_INTERRUPT
        }
    };

    tools.manager().shutdown().await;
    info!("gateway stopped");
    exit_code
}

async fn write_status_snapshot(tools: &Arc<GatewayTools>) {
    let Some(path) = super::status_file() else {
        return;
    };
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }

    let snapshot = tools.catalog().snapshot();
    let statuses = tools.manager().statuses().await;
    let status = json!({
        "pid": std::process::id(),
        "written_at": chrono::Utc::now().to_rfc3339(),
        "revision_id": snapshot.revision_id,
        "last_refresh_ts": snapshot.last_refresh_ts,
        "servers": statuses.iter().map(|s| json!({
            "name": s.name,
            "state": s.state.as_str(),
            "last_error": s.last_error,
            "tool_count": snapshot.tool_count_for(&s.name),
            "pending_requests": s.pending_requests,
            "retry_count": s.retry_count,
        })).collect::<Vec<_>>(),
    });

    if let Ok(serialized) = serde_json::to_string_pretty(&status) {
        let _ = std::fs::write(path, serialized);
    }
}
