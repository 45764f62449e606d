//! # userspace-cni
//!
//! **CNI plugin for userspace dataplanes**
//!
//! Attaches container sandboxes to a userspace network engine (VPP) on the
//! host. Each command drives a host-side engine, an optional IPAM plugin
//! and a container-side engine in a fixed order, and cleans up the
//! sandbox's link on DEL.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         userspace (binary)                          │
//! │            skel: CNI_* env + stdin  →  result / error JSON          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                        Plugin (cmd_add / cmd_del)                   │
//! │  ┌───────────────┐  ┌──────────────┐   ┌────────────────────────┐   │
//! │  │ EngineRegistry│  │  Ipam        │   │ NetnsOps               │   │
//! │  │ host/container│  │  ExecIpam    │   │ with_netns + link del  │   │
//! │  └──────┬────────┘  └──────┬───────┘   └────────────────────────┘   │
//! │         │                  │ CniResult → mapper → IpData            │
//! │  ┌──────▼───────┐          │                                        │
//! │  │  VppEngine   │◄─────────┘                                        │
//! │  │  memif/vppctl│                                                   │
//! │  └──────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Engine Selection
//!
//! `hostConf.engine` picks the host engine; `containerConf.engine` picks the
//! container engine and defaults to the host engine. `vpp` is supported,
//! `ovs-dpdk` is recognized but rejected as unsupported, anything else is
//! unknown.
//!
//! # Failure Semantics
//!
//! The first failing step aborts the command and nothing already done is
//! rolled back. DEL tolerates missing state at every step, so the runtime's
//! DEL after a failed ADD cleans up.
//!
//! # Example
//!
//! ```rust,ignore
//! use userspace_cni::{Plugin, Settings, skel};
//!
//! fn main() -> std::process::ExitCode {
//!     let plugin = Plugin::from_settings(&Settings::from_env());
//!     skel::plugin_main(&plugin)
//! }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod engines;
pub mod error;
pub mod ipam;
pub mod mapper;
pub mod netns;
pub mod plugin;
pub mod skel;
pub mod types;

// Re-exports
pub use config::{NetConf, Settings, load_net_conf};
pub use engine::{EngineClass, EngineRegistry, EngineRole, NetworkEngine};
pub use engines::VppEngine;
pub use error::{Error, Result};
pub use ipam::{ExecIpam, Ipam};
pub use netns::{AddressFamily, LinkError, NetnsOps, SystemNetns};
pub use plugin::Plugin;
pub use skel::{CmdArgs, CniCommand};
pub use types::{CniResult, IpConfig, IpData};
