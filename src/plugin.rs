//! # ADD / DEL Orchestration
//!
//! Sequences the host engine, IPAM, the container engine and namespace
//! cleanup for the two CNI commands.
//!
//! ```text
//!   ADD                                   DEL
//!   ───                                   ───
//!   load NetConf                          load NetConf
//!        │                                     │
//!   host engine: attach_on_host           host engine: detach_from_host
//!        │                                     │
//!   ipam.type set? ── allocate            container engine: detach_from_container
//!        │             normalize               │
//!        │             select IpData      ipam.type set? ── release
//!        │             clear gateways          │
//!        │                                netns given? ── delete link (v4),
//!   container engine: attach_on_container                 missing link is ok
//!        │
//!   result in conf.cniVersion
//! ```
//!
//! The first failure aborts the command. Completed steps are not undone:
//! a host attachment left behind by a failed ADD is removed by the DEL the
//! runtime issues for the failed sandbox, which tolerates partial state.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{NetConf, Settings, load_net_conf};
use crate::engine::{EngineRegistry, EngineRole, engine_failure};
use crate::error::{Error, Result};
use crate::ipam::{ExecIpam, Ipam, ipam_failure};
use crate::mapper::{clear_gateways, select_ip_data};
use crate::netns::{AddressFamily, LinkError, NetnsOps, SystemNetns};
use crate::skel::CmdArgs;
use crate::types::{CniResult, IpData};

/// The userspace CNI plugin.
pub struct Plugin {
    engines: EngineRegistry,
    ipam: Box<dyn Ipam>,
    netns: Box<dyn NetnsOps>,
}

impl Plugin {
    /// Creates a plugin from its collaborators.
    pub fn new(engines: EngineRegistry, ipam: Box<dyn Ipam>, netns: Box<dyn NetnsOps>) -> Self {
        Self {
            engines,
            ipam,
            netns,
        }
    }

    /// Creates a plugin wired to the real system.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            EngineRegistry::with_defaults(settings),
            Box::new(ExecIpam::new(settings.cni_path.clone())),
            Box::new(SystemNetns),
        )
    }

    /// Handles ADD and returns the result in the config's CNI version.
    pub fn cmd_add(&self, args: &CmdArgs) -> Result<Value> {
        let conf = load_net_conf(&args.stdin_data)?;
        info!("ADD container {} ifname {}", args.container_id, args.if_name);

        // Host
        let host_engine = conf.host_conf.engine.as_str();
        let host = self.engines.resolve(EngineRole::Host, host_engine)?;
        host.attach_on_host(&conf, &IpData::default(), &args.container_id)
            .map_err(|e| engine_failure(EngineRole::Host, host_engine, e))?;

        // Everything past this point leaves the host attachment in place on
        // failure.
        self.attach_container(&conf, args).inspect_err(|e| {
            warn!(
                "ADD for container {} failed after host attach, DEL required: {}",
                args.container_id, e
            );
        })
    }

    fn attach_container(&self, conf: &NetConf, args: &CmdArgs) -> Result<Value> {
        let mut result = CniResult::default();
        let mut ip_data = IpData::default();

        if let Some(plugin) = conf.ipam_type() {
            let raw = self
                .ipam
                .allocate(plugin, &args.stdin_data)
                .map_err(|e| ipam_failure(plugin, e))?;
            result = CniResult::from_ipam_output(raw).map_err(|e| Error::Ipam {
                plugin: plugin.to_string(),
                reason: format!("failed to convert result: {e}"),
            })?;

            if result.ips.is_empty() {
                return Err(Error::NoAddress {
                    plugin: plugin.to_string(),
                });
            }

            ip_data = select_ip_data(plugin, &result)?;
            clear_gateways(&mut result);
            debug!("IPAM {} assigned {}/{}", plugin, ip_data.address, ip_data.prefix_len);
        }

        let container_engine = conf.container_engine();
        let container = self
            .engines
            .resolve(EngineRole::Container, container_engine)?;
        container
            .attach_on_container(conf, &ip_data, &args.container_id)
            .map_err(|e| engine_failure(EngineRole::Container, container_engine, e))?;

        info!("ADD container {} complete", args.container_id);
        result.to_version(conf.cni_version())
    }

    /// Handles DEL. Safe to repeat.
    pub fn cmd_del(&self, args: &CmdArgs) -> Result<()> {
        let conf = load_net_conf(&args.stdin_data)?;
        info!("DEL container {} ifname {}", args.container_id, args.if_name);

        // Host
        let host_engine = conf.host_conf.engine.as_str();
        let host = self.engines.resolve(EngineRole::Host, host_engine)?;
        host.detach_from_host(&conf, &args.container_id)
            .map_err(|e| engine_failure(EngineRole::Host, host_engine, e))?;

        // Container
        let container_engine = conf.container_engine();
        let container = self
            .engines
            .resolve(EngineRole::Container, container_engine)?;
        container
            .detach_from_container(&conf, &args.container_id)
            .map_err(|e| engine_failure(EngineRole::Container, container_engine, e))?;

        if let Some(plugin) = conf.ipam_type() {
            self.ipam
                .release(plugin, &args.stdin_data)
                .map_err(|e| ipam_failure(plugin, e))?;
        }

        let Some(netns) = args.netns.as_deref() else {
            debug!("no netns for container {}, skipping link cleanup", args.container_id);
            return Ok(());
        };

        match self.netns.delete_link(netns, &args.if_name, AddressFamily::V4) {
            Ok(()) => {}
            Err(LinkError::NotFound) => {
                debug!("link {} already gone in {}", args.if_name, netns.display());
            }
            Err(LinkError::Other(reason)) => {
                return Err(Error::NamespaceCleanup {
                    netns: netns.to_path_buf(),
                    if_name: args.if_name.clone(),
                    reason,
                });
            }
        }

        info!("DEL container {} complete", args.container_id);
        Ok(())
    }
}
