//! Network configuration and process settings.
//!
//! [`NetConf`] is the JSON document the runtime passes on stdin. Only the
//! fields the plugin acts on are modelled; everything else is ignored so
//! that chained plugin configs and IPAM-specific keys pass through.
//!
//! ```json
//! {
//!   "cniVersion": "0.3.1",
//!   "name": "userspace-vpp",
//!   "type": "userspace",
//!   "hostConf": {
//!     "engine": "vpp",
//!     "iftype": "memif",
//!     "netType": "bridge",
//!     "memif": { "role": "master", "mode": "ethernet" },
//!     "bridge": { "bridgeId": 4 }
//!   },
//!   "containerConf": { "engine": "vpp", "iftype": "memif" },
//!   "ipam": { "type": "host-local", "subnet": "10.56.217.0/24" }
//! }
//! ```

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CNI_VERSION, DEFAULT_DATA_DIR, DEFAULT_SOCKET_DIR, DEFAULT_VPPCTL, ENV_DATA_DIR,
    ENV_PATH, ENV_SOCKET_DIR, ENV_VPPCTL,
};
use crate::error::{Error, Result};

// =============================================================================
// NetConf
// =============================================================================

/// Parsed network configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    /// CNI version the runtime expects the result in.
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plugin_type: String,
    /// Host side of the attachment.
    #[serde(default, alias = "host")]
    pub host_conf: UserSpaceConf,
    /// Sandbox side of the attachment. Engine defaults to the host's.
    #[serde(default, alias = "container")]
    pub container_conf: UserSpaceConf,
    #[serde(default)]
    pub ipam: IpamConf,
}

impl NetConf {
    /// The CNI version to report results in.
    pub fn cni_version(&self) -> &str {
        if self.cni_version.is_empty() {
            DEFAULT_CNI_VERSION
        } else {
            &self.cni_version
        }
    }

    /// The engine handling the container side.
    ///
    /// Falls back to the host engine when `containerConf.engine` is unset.
    pub fn container_engine(&self) -> &str {
        if self.container_conf.engine.is_empty() {
            &self.host_conf.engine
        } else {
            &self.container_conf.engine
        }
    }

    /// The IPAM plugin to run, if any.
    pub fn ipam_type(&self) -> Option<&str> {
        if self.ipam.plugin_type.is_empty() {
            None
        } else {
            Some(&self.ipam.plugin_type)
        }
    }
}

/// Per-side engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpaceConf {
    #[serde(default)]
    pub engine: String,
    /// Interface flavour. Only `memif` is attached by the VPP engine.
    #[serde(default, rename = "iftype")]
    pub if_type: String,
    /// How the interface is wired on the engine: `bridge` or `interface`.
    #[serde(default)]
    pub net_type: String,
    #[serde(default)]
    pub memif: MemifConf,
    #[serde(default)]
    pub bridge: BridgeConf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemifConf {
    /// `master` or `slave`.
    #[serde(default)]
    pub role: String,
    /// `ethernet`, `ip` or `inject-punt`.
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConf {
    /// VPP bridge domain the host interface joins.
    #[serde(default)]
    pub bridge_id: u32,
}

/// IPAM section. Only the plugin type is interpreted here; the IPAM plugin
/// receives the whole raw config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpamConf {
    #[serde(default, rename = "type")]
    pub plugin_type: String,
}

/// Decodes the configuration document passed on stdin.
pub fn load_net_conf(bytes: &[u8]) -> Result<NetConf> {
    serde_json::from_slice(bytes).map_err(|e| Error::ConfigLoad(e.to_string()))
}

// =============================================================================
// Settings
// =============================================================================

/// Process-level settings taken from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directories searched for IPAM plugin binaries.
    pub cni_path: Vec<PathBuf>,
    /// VPP attachment records.
    pub data_dir: PathBuf,
    /// memif sockets shared with sandboxes.
    pub socket_dir: PathBuf,
    /// `vppctl` binary.
    pub vppctl: PathBuf,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let cni_path = non_empty(ENV_PATH)
            .map(|v| env::split_paths(&v).collect())
            .unwrap_or_default();

        Self {
            cni_path,
            data_dir: non_empty(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            socket_dir: non_empty(ENV_SOCKET_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_DIR)),
            vppctl: non_empty(ENV_VPPCTL)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VPPCTL)),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
