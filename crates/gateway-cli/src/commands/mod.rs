//! CLI subcommands.

pub mod init;
pub mod logs;
pub mod refresh;
pub mod serve;
pub mod status;

use std::path::PathBuf;

/// Exit code for configuration or policy errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when a downstream server fails to start non-interactively.
pub const EXIT_DOWNSTREAM: i32 = 3;
/// Exit code on interrupt.
pub const EXIT_INTERRUPT: i32 = 130;

/// Path of the status snapshot the serve loop maintains.
pub fn status_file() -> Option<PathBuf> {
    gateway_core::cache_dir().map(|d| d.join("status.json"))
}

/// Path of the gateway log file.
pub fn log_file() -> Option<PathBuf> {
    gateway_core::cache_dir().map(|d| d.join("gateway.log"))
}
