use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "mcp-gateway",
    version,
    about = "A meta-server that collapses many MCP servers into nine meta-tools"
)]
struct Cli {
    /// Project root directory (for .mcp.json discovery)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Custom MCP config file path (replaces discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Policy file path (YAML or JSON)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long, global = true, value_parser = ["debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the state of a running gateway from its status snapshot
    Status {
        /// Print raw JSON
        #[arg(long)]
        json: bool,

        /// Limit output to one server
        #[arg(short, long)]
        server: Option<String>,

        /// Include pending request counts
        #[arg(long)]
        pending: bool,
    },

    /// Print (or follow) the gateway log
    Logs {
        /// Keep reading as the log grows
        #[arg(short, long)]
        follow: bool,

        /// Number of trailing lines to print
        #[arg(short, long, default_value_t = 50)]
        tail: usize,

        /// Only show lines at this level or above
        #[arg(short, long, value_parser = ["debug", "info", "warn", "error"])]
        level: Option<String>,
    },

    /// One-shot reconnect: load config and policy, start sessions, report
    Refresh {
        /// Refresh only this server
        #[arg(short, long)]
        server: Option<String>,

        /// Restart sessions even when their specs are unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Write starter config and policy files
    Init {
        /// Directory for the project .mcp.json
        #[arg(long)]
        project: Option<PathBuf>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn resolve_log_level(cli: &Cli) -> String {
    if cli.debug {
        return "debug".to_string();
    }
    if cli.quiet {
        return "error".to_string();
    }
    cli.log_level
        .clone()
        .or_else(|| std::env::var("MCP_GATEWAY_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = resolve_log_level(&cli);

    let code = match cli.cmd {
        Some(Command::Status {
            json,
            ref server,
            pending,
        }) => commands::status::run(json, server.as_deref(), pending),
        Some(Command::Logs {
            follow,
            tail,
            ref level,
        }) => commands::logs::run(follow, tail, level.as_deref()),
        Some(Command::Refresh { ref server, force }) => {
            commands::refresh::run(&cli.config, &cli.project, &cli.policy, server.as_deref(), force)
                .await
        }
        Some(Command::Init { ref project, force }) => {
            commands::init::run(project.as_ref().or(cli.project.as_ref()), force)
        }
        None => {
            commands::serve::run(&cli.config, &cli.project, &cli.policy, &log_level).await
        }
    };
    std::process::exit(code);
}
