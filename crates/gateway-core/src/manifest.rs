//! Static manifest of provisionable servers and CLI alternatives.
//!
//! The manifest ships embedded in the binary. It names the servers the
//! provisioner knows how to install, the environment variables they need,
//! and a probe list of CLI tools that can stand in for a server.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const EMBEDDED_MANIFEST: &str = include_str!("manifest.json");

/// Host platform, as the install recipes key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mac,
    Linux,
    Wsl,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mac => "mac",
            Self::Linux => "linux",
            Self::Wsl => "wsl",
            Self::Windows => "windows",
        }
    }

    /// Detect the current platform. WSL reports a Linux kernel, so it is
    /// distinguished by the kernel version string.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            return Self::Mac;
        }
        if cfg!(target_os = "windows") {
            return Self::Windows;
        }
        if let Ok(version) = std::fs::read_to_string("/proc/version") {
            if version.to_lowercase().contains("microsoft") {
                return Self::Wsl;
            }
        }
        Self::Linux
    }
}

/// One provisionable server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestServer {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Install recipe per platform: a sequence of argv commands.
    #[serde(default)]
    pub install: HashMap<String, Vec<Vec<String>>>,
    /// Launch command once installed.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub requires_api_key: bool,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default)]
    pub env_instructions: Option<String>,
}

impl ManifestServer {
    /// The install recipe for a platform, if one exists.
    pub fn recipe(&self, platform: Platform) -> Option<&[Vec<String>]> {
        self.install.get(platform.as_str()).map(|v| v.as_slice())
    }

    /// Check that the required environment variable is set and non-empty.
    pub fn check_env(&self) -> Result<()> {
        if !self.requires_api_key {
            return Ok(());
        }
        let var = self.env_var.as_deref().unwrap_or_default();
        let present = !var.is_empty()
            && std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
        if present {
            return Ok(());
        }
        let mut reason = format!("environment variable {} is not set", var);
        if let Some(instructions) = &self.env_instructions {
            reason.push_str("; ");
            reason.push_str(instructions);
        }
        Err(GatewayError::ProvisionFailed {
            server: self.name.clone(),
            step: "environment check".to_string(),
            reason,
        })
    }
}

/// A CLI tool that can substitute for a server capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliAlternative {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Command used to confirm the CLI works, e.g. `["git", "--version"]`.
    pub check_command: Vec<String>,
}

/// The complete manifest catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default)]
    pub servers: HashMap<String, ManifestServer>,
    #[serde(default)]
    pub cli_alternatives: HashMap<String, CliAlternative>,
}

impl Manifest {
    /// Load the embedded manifest.
    pub fn load() -> Result<Self> {
        serde_json::from_str(EMBEDDED_MANIFEST)
            .map_err(|e| GatewayError::ConfigInvalid(format!("embedded manifest: {}", e)))
    }

    pub fn get_server(&self, name: &str) -> Option<&ManifestServer> {
        self.servers.get(name)
    }

    pub fn get_cli(&self, name: &str) -> Option<&CliAlternative> {
        self.cli_alternatives.get(name)
    }

    /// Names of CLI alternatives whose executable is on PATH.
    pub fn probe_clis(&self) -> Vec<String> {
        let mut detected: Vec<String> = self
            .cli_alternatives
            .values()
            .filter(|cli| {
                cli.check_command
                    .first()
                    .map(|exe| find_in_path(exe).is_some())
                    .unwrap_or(false)
            })
            .map(|cli| cli.name.clone())
            .collect();
        detected.sort();
        detected
    }
}

/// Locate an executable on PATH.
pub fn find_in_path(exe: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(exe);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
