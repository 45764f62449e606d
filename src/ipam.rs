//! IPAM plugin invocation.
//!
//! Address management is delegated to a separate CNI plugin binary named
//! by `ipam.type`. The plugin is looked up in `CNI_PATH`, given the same
//! configuration document on stdin and the caller's `CNI_*` environment,
//! with `CNI_COMMAND` overridden to `ADD` or `DEL`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::constants::ENV_COMMAND;
use crate::error::{Error, Result};

/// Address allocation boundary.
pub trait Ipam: Send + Sync {
    /// Allocates addresses; returns the plugin's raw result document.
    fn allocate(&self, plugin: &str, config: &[u8]) -> Result<Value>;

    /// Releases whatever `allocate` handed out for the same config.
    fn release(&self, plugin: &str, config: &[u8]) -> Result<()>;
}

/// Error document CNI plugins print on failure.
#[derive(Debug, Deserialize)]
struct PluginError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// [`Ipam`] that executes IPAM plugin binaries.
pub struct ExecIpam {
    search_path: Vec<PathBuf>,
}

impl ExecIpam {
    /// Creates an executor searching the given directories in order.
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Finds the plugin binary in the search path.
    pub fn find_plugin(&self, plugin: &str) -> Result<PathBuf> {
        if plugin.is_empty() || plugin.contains('/') {
            return Err(ipam_error(plugin, "invalid plugin name".to_string()));
        }

        self.search_path
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                ipam_error(
                    plugin,
                    format!(
                        "plugin not found in CNI_PATH [{}]",
                        self.search_path
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
            })
    }

    fn exec(&self, plugin: &str, command: &str, config: &[u8]) -> Result<Vec<u8>> {
        let binary = self.find_plugin(plugin)?;
        debug!("running IPAM {} {}", command, binary.display());

        let output = run_plugin(&binary, command, config)
            .map_err(|e| ipam_error(plugin, format!("failed to run {}: {}", binary.display(), e)))?;

        if !output.status.success() {
            let reason = match serde_json::from_slice::<PluginError>(&output.stdout) {
                Ok(err) if !err.msg.is_empty() => {
                    if err.details.is_empty() {
                        format!("{} (code {})", err.msg, err.code)
                    } else {
                        format!("{} (code {}): {}", err.msg, err.code, err.details)
                    }
                }
                _ => format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            };
            return Err(ipam_error(plugin, reason));
        }

        Ok(output.stdout)
    }
}

fn run_plugin(binary: &Path, command: &str, config: &[u8]) -> std::io::Result<std::process::Output> {
    let mut child = Command::new(binary)
        .env(ENV_COMMAND, command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(config)?;
    }

    child.wait_with_output()
}

fn ipam_error(plugin: &str, reason: String) -> Error {
    Error::Ipam {
        plugin: plugin.to_string(),
        reason,
    }
}

/// Wraps a failure from an [`Ipam`] implementation with the plugin name.
pub(crate) fn ipam_failure(plugin: &str, err: Error) -> Error {
    match err {
        e @ Error::Ipam { .. } => e,
        other => ipam_error(plugin, other.to_string()),
    }
}

impl Ipam for ExecIpam {
    fn allocate(&self, plugin: &str, config: &[u8]) -> Result<Value> {
        let stdout = self.exec(plugin, "ADD", config)?;
        serde_json::from_slice(&stdout)
            .map_err(|e| ipam_error(plugin, format!("invalid result: {e}")))
    }

    fn release(&self, plugin: &str, config: &[u8]) -> Result<()> {
        self.exec(plugin, "DEL", config).map(|_| ())
    }
}
