//! # VPP Engine - memif Attachments
//!
//! Attaches sandboxes to a VPP instance on the host through shared-memory
//! (memif) interfaces, driven via the `vppctl` debug CLI.
//!
//! ## Layout
//!
//! ```text
//! ┌───────────────────── Host ─────────────────────┐
//! │  VPP                                           │
//! │   memif<N>/0 (master) ── bridge-domain <id>    │
//! │        │                                       │
//! │   /var/run/vpp/cni/shared/memif-<id12>.sock ◄──┼── mounted in sandbox
//! │                                                │
//! │  /var/run/vpp/cni/data/                        │
//! │   local-<id12>.json   host attachment record   │
//! │   remote-<id12>.json  sandbox attachment data  │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The sandbox side is not programmed from here: the application inside
//! the sandbox (its own VPP or a memif client) reads `remote-<id12>.json`
//! to learn the socket, its role and the assigned address.
//!
//! ## Idempotence
//!
//! The host record is written before each VPP object is created and marked
//! `attached` only at the end. Attaching a container whose record is
//! complete is a no-op; a partial record is torn down and the attach
//! starts over. Detach deletes whatever the record names, and treats
//! objects VPP no longer knows about (after a VPP restart, say) as gone.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{NetConf, Settings};
use crate::constants::{CONTAINER_ID_PREFIX_LEN, ENGINE_VPP, MAX_MEMIF_SOCKET_ID};
use crate::engine::{EngineRole, NetworkEngine};
use crate::error::{Error, Result};
use crate::types::IpData;

const HOST_RECORD_PREFIX: &str = "local-";
const CONTAINER_RECORD_PREFIX: &str = "remote-";

// =============================================================================
// vppctl
// =============================================================================

/// Runs VPP debug CLI commands.
pub trait VppCli: Send + Sync {
    /// Executes one CLI command and returns its trimmed output.
    fn exec(&self, args: &[String]) -> Result<String>;
}

/// [`VppCli`] backed by the `vppctl` binary.
pub struct VppCtl {
    binary: PathBuf,
}

impl VppCtl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl VppCli for VppCtl {
    fn exec(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            vpp_error(format!(
                "failed to run {}: {} (is VPP installed?)",
                self.binary.display(),
                e
            ))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(vpp_error(format!(
                "'{}' exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        // vppctl reports parse errors on stdout with a zero exit status.
        if stdout.starts_with("unknown input") {
            return Err(vpp_error(format!("'{}': {}", args.join(" "), stdout)));
        }

        Ok(stdout)
    }
}

fn vpp_error(reason: String) -> Error {
    Error::Engine {
        role: EngineRole::Host,
        engine: ENGINE_VPP.to_string(),
        reason,
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Replies VPP gives when asked to delete an object it does not have.
///
/// Names the CLI cannot resolve are reported as `unknown input`.
const GONE_MARKERS: &[&str] = &["unknown input", "not found", "does not exist"];

fn is_gone(err: &Error) -> bool {
    matches!(err, Error::Engine { reason, .. } if GONE_MARKERS.iter().any(|m| reason.contains(m)))
}

// =============================================================================
// Records
// =============================================================================

/// What the host attach created, needed to undo it.
///
/// Written before each VPP object is created, so a host attach that fails
/// halfway still leaves enough behind for detach to clean up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub container_id: String,
    pub socket_id: u32,
    pub socket_file: PathBuf,
    /// VPP interface name, e.g. `memif3/0`.
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_id: Option<u32>,
    /// Set once every step of the attach succeeded.
    #[serde(default)]
    pub attached: bool,
}

/// What the sandbox side needs to bring up its end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub container_id: String,
    pub if_type: String,
    pub socket_file: PathBuf,
    /// Role of the sandbox end, opposite to the host end.
    pub role: String,
    pub mode: String,
    /// Absent when no IPAM is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpData>,
}

fn short_id(container_id: &str) -> &str {
    match container_id.char_indices().nth(CONTAINER_ID_PREFIX_LEN) {
        Some((idx, _)) => &container_id[..idx],
        None => container_id,
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_vec_pretty(record)?;
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Io(e)
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// VppEngine
// =============================================================================

/// The `vpp` engine.
pub struct VppEngine {
    data_dir: PathBuf,
    socket_dir: PathBuf,
    cli: Box<dyn VppCli>,
}

impl VppEngine {
    /// Creates an engine driving the `vppctl` named in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self::with_cli(settings, Box::new(VppCtl::new(&settings.vppctl)))
    }

    /// Creates an engine with a custom CLI backend.
    pub fn with_cli(settings: &Settings, cli: Box<dyn VppCli>) -> Self {
        Self {
            data_dir: settings.data_dir.clone(),
            socket_dir: settings.socket_dir.clone(),
            cli,
        }
    }

    /// Path of the host record for a container.
    pub fn host_record_path(&self, container_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("{HOST_RECORD_PREFIX}{}.json", short_id(container_id)))
    }

    /// Path of the sandbox record for a container.
    pub fn container_record_path(&self, container_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("{CONTAINER_RECORD_PREFIX}{}.json", short_id(container_id)))
    }

    fn socket_path(&self, container_id: &str) -> PathBuf {
        self.socket_dir
            .join(format!("memif-{}.sock", short_id(container_id)))
    }

    /// Returns the smallest memif socket id not held by a host record.
    ///
    /// Socket id 0 is VPP's built-in default socket and never handed out.
    fn next_socket_id(&self) -> Result<u32> {
        let mut used = HashSet::new();

        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            let is_host_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(HOST_RECORD_PREFIX) && n.ends_with(".json"));
            if !is_host_record {
                continue;
            }
            if let Some(record) = read_record::<HostRecord>(&path)? {
                used.insert(record.socket_id);
            }
        }

        (1..=MAX_MEMIF_SOCKET_ID)
            .find(|id| !used.contains(id))
            .ok_or_else(|| vpp_error("no free memif socket id".to_string()))
    }

    /// Runs a delete command, treating objects VPP no longer has as deleted.
    fn exec_delete(&self, command: &[&str]) -> Result<()> {
        match self.cli.exec(&args(command)) {
            Ok(_) => Ok(()),
            Err(e) if is_gone(&e) => {
                debug!("'{}' found nothing to delete: {}", command.join(" "), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Removes everything a host record describes, in reverse creation order.
    fn teardown(&self, record: &HostRecord) -> Result<()> {
        let socket_id = record.socket_id.to_string();
        self.exec_delete(&["delete", "interface", "memif", record.interface.as_str()])?;
        self.exec_delete(&["delete", "memif", "socket", "id", socket_id.as_str()])?;
        remove_if_exists(&record.socket_file)
    }
}

impl NetworkEngine for VppEngine {
    fn name(&self) -> &str {
        ENGINE_VPP
    }

    fn attach_on_host(&self, conf: &NetConf, _ip: &IpData, container_id: &str) -> Result<()> {
        let host = &conf.host_conf;
        if !host.if_type.is_empty() && host.if_type != "memif" {
            return Err(vpp_error(format!(
                "interface type '{}' is not supported",
                host.if_type
            )));
        }

        let record_path = self.host_record_path(container_id);
        if let Some(existing) = read_record::<HostRecord>(&record_path)? {
            if existing.attached {
                info!("container {} already attached to VPP", container_id);
                return Ok(());
            }
            warn!(
                "clearing partial VPP attachment {} for container {}",
                existing.interface, container_id
            );
            self.teardown(&existing)?;
            remove_if_exists(&record_path)?;
        }

        let socket_id = self.next_socket_id()?;
        let socket_id_arg = socket_id.to_string();
        let mut record = HostRecord {
            container_id: container_id.to_string(),
            socket_id,
            socket_file: self.socket_path(container_id),
            interface: format!("memif{socket_id}/0"),
            bridge_id: None,
            attached: false,
        };
        fs::create_dir_all(&self.socket_dir)?;
        write_record(&record_path, &record)?;

        let socket_name = record.socket_file.to_string_lossy().into_owned();
        self.cli.exec(&args(&[
            "create",
            "memif",
            "socket",
            "id",
            socket_id_arg.as_str(),
            "filename",
            socket_name.as_str(),
        ]))?;

        let role = if host.memif.role.is_empty() {
            "master"
        } else {
            host.memif.role.as_str()
        };
        let mut create = args(&[
            "create",
            "interface",
            "memif",
            "id",
            "0",
            "socket-id",
            socket_id_arg.as_str(),
        ]);
        if host.memif.mode == "ip" {
            create.extend(args(&["mode", "ip"]));
        }
        create.push(role.to_string());
        let created = self.cli.exec(&create)?;
        if !created.is_empty() && created != record.interface {
            record.interface = created;
            write_record(&record_path, &record)?;
        }

        self.cli.exec(&args(&[
            "set",
            "interface",
            "state",
            record.interface.as_str(),
            "up",
        ]))?;

        if host.net_type == "bridge" {
            let bridge = host.bridge.bridge_id.to_string();
            self.cli.exec(&args(&[
                "set",
                "interface",
                "l2",
                "bridge",
                record.interface.as_str(),
                bridge.as_str(),
            ]))?;
            record.bridge_id = Some(host.bridge.bridge_id);
        }

        record.attached = true;
        write_record(&record_path, &record)?;

        info!(
            "attached {} on host for container {}",
            record.interface, container_id
        );
        Ok(())
    }

    fn attach_on_container(&self, conf: &NetConf, ip: &IpData, container_id: &str) -> Result<()> {
        let container = &conf.container_conf;
        let if_type = if container.if_type.is_empty() {
            "memif".to_string()
        } else {
            container.if_type.clone()
        };
        if if_type != "memif" {
            return Err(Error::Engine {
                role: EngineRole::Container,
                engine: ENGINE_VPP.to_string(),
                reason: format!("interface type '{if_type}' is not supported"),
            });
        }

        let socket_file = read_record::<HostRecord>(&self.host_record_path(container_id))?
            .map(|r| r.socket_file)
            .unwrap_or_else(|| self.socket_path(container_id));

        let role = match container.memif.role.as_str() {
            "" => match conf.host_conf.memif.role.as_str() {
                "slave" => "master",
                _ => "slave",
            },
            other => other,
        };
        let mode = if container.memif.mode.is_empty() {
            "ethernet"
        } else {
            container.memif.mode.as_str()
        };

        let record = ContainerRecord {
            container_id: container_id.to_string(),
            if_type,
            socket_file,
            role: role.to_string(),
            mode: mode.to_string(),
            ip: ip.is_assigned().then(|| ip.clone()),
        };
        write_record(&self.container_record_path(container_id), &record)?;

        debug!("wrote sandbox attachment data for container {}", container_id);
        Ok(())
    }

    fn detach_from_host(&self, _conf: &NetConf, container_id: &str) -> Result<()> {
        let record_path = self.host_record_path(container_id);
        let Some(record) = read_record::<HostRecord>(&record_path)? else {
            debug!("no VPP host record for container {}", container_id);
            return Ok(());
        };

        self.teardown(&record)?;
        remove_if_exists(&record_path)?;

        info!(
            "detached {} on host for container {}",
            record.interface, container_id
        );
        Ok(())
    }

    fn detach_from_container(&self, _conf: &NetConf, container_id: &str) -> Result<()> {
        remove_if_exists(&self.container_record_path(container_id))
    }
}
