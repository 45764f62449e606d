//! Tests for ADD/DEL orchestration.
//!
//! Engines, IPAM and namespace operations are replaced by recording fakes
//! so ordering and failure propagation can be observed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use userspace_cni::engine::{EngineRegistry, EngineRole, NetworkEngine};
use userspace_cni::error::{Error, Result};
use userspace_cni::ipam::Ipam;
use userspace_cni::netns::{AddressFamily, LinkError, NetnsOps};
use userspace_cni::{CmdArgs, IpData, NetConf, Plugin};

// =============================================================================
// Fakes
// =============================================================================

type CallLog = Arc<Mutex<Vec<String>>>;

struct RecordingEngine {
    name: String,
    log: CallLog,
    fail_on: Option<&'static str>,
    container_ip: Arc<Mutex<Option<IpData>>>,
}

impl RecordingEngine {
    fn record(&self, call: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:{}", call, self.name));
        if self.fail_on == Some(call) {
            return Err(Error::Io(std::io::Error::other(format!("{call} exploded"))));
        }
        Ok(())
    }
}

impl NetworkEngine for RecordingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_on_host(&self, _conf: &NetConf, ip: &IpData, _container_id: &str) -> Result<()> {
        assert_eq!(ip, &IpData::default(), "host attach never gets an address");
        self.record("attach_on_host")
    }

    fn attach_on_container(&self, _conf: &NetConf, ip: &IpData, _container_id: &str) -> Result<()> {
        *self.container_ip.lock().unwrap() = Some(ip.clone());
        self.record("attach_on_container")
    }

    fn detach_from_host(&self, _conf: &NetConf, _container_id: &str) -> Result<()> {
        self.record("detach_from_host")
    }

    fn detach_from_container(&self, _conf: &NetConf, _container_id: &str) -> Result<()> {
        self.record("detach_from_container")
    }
}

struct FakeIpam {
    log: CallLog,
    result: Value,
    fail: bool,
}

impl Ipam for FakeIpam {
    fn allocate(&self, plugin: &str, config: &[u8]) -> Result<Value> {
        assert!(!config.is_empty(), "IPAM receives the raw config");
        self.log.lock().unwrap().push(format!("ipam_allocate:{plugin}"));
        if self.fail {
            return Err(Error::Ipam {
                plugin: plugin.to_string(),
                reason: "pool exhausted".to_string(),
            });
        }
        Ok(self.result.clone())
    }

    fn release(&self, plugin: &str, _config: &[u8]) -> Result<()> {
        self.log.lock().unwrap().push(format!("ipam_release:{plugin}"));
        Ok(())
    }
}

enum LinkBehavior {
    /// Link exists until the first removal.
    Present(Mutex<bool>),
    Broken(&'static str),
}

struct FakeNetns {
    log: CallLog,
    behavior: LinkBehavior,
}

impl NetnsOps for FakeNetns {
    fn delete_link(
        &self,
        netns: &Path,
        if_name: &str,
        family: AddressFamily,
    ) -> std::result::Result<(), LinkError> {
        assert_eq!(family, AddressFamily::V4);
        self.log
            .lock()
            .unwrap()
            .push(format!("delete_link:{}:{}", netns.display(), if_name));
        match &self.behavior {
            LinkBehavior::Present(present) => {
                let mut present = present.lock().unwrap();
                if *present {
                    *present = false;
                    Ok(())
                } else {
                    Err(LinkError::NotFound)
                }
            }
            LinkBehavior::Broken(reason) => Err(LinkError::Other(reason.to_string())),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    plugin: Plugin,
    log: CallLog,
    container_ip: Arc<Mutex<Option<IpData>>>,
}

struct HarnessBuilder {
    fail_on: Option<&'static str>,
    ipam_result: Value,
    ipam_fail: bool,
    link: LinkBehavior,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            fail_on: None,
            ipam_result: json!({
                "cniVersion": "0.3.1",
                "ips": [{ "version": "4", "address": "10.56.217.2/24", "gateway": "10.56.217.1" }]
            }),
            ipam_fail: false,
            link: LinkBehavior::Present(Mutex::new(true)),
        }
    }

    fn fail_on(mut self, call: &'static str) -> Self {
        self.fail_on = Some(call);
        self
    }

    fn ipam_result(mut self, result: Value) -> Self {
        self.ipam_result = result;
        self
    }

    fn ipam_fail(mut self) -> Self {
        self.ipam_fail = true;
        self
    }

    fn link(mut self, link: LinkBehavior) -> Self {
        self.link = link;
        self
    }

    fn build(self) -> Harness {
        let log = CallLog::default();
        let container_ip = Arc::new(Mutex::new(None));

        let mut engines = EngineRegistry::new();
        engines.register(Box::new(RecordingEngine {
            name: "vpp".to_string(),
            log: log.clone(),
            fail_on: self.fail_on,
            container_ip: container_ip.clone(),
        }));

        let plugin = Plugin::new(
            engines,
            Box::new(FakeIpam {
                log: log.clone(),
                result: self.ipam_result,
                fail: self.ipam_fail,
            }),
            Box::new(FakeNetns {
                log: log.clone(),
                behavior: self.link,
            }),
        );

        Harness {
            plugin,
            log,
            container_ip,
        }
    }
}

impl Harness {
    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn container_ip(&self) -> Option<IpData> {
        self.container_ip.lock().unwrap().clone()
    }
}

fn cmd_args(conf: Value, netns: Option<&str>) -> CmdArgs {
    CmdArgs {
        container_id: "4f1c2b9e8d7a6c5b".to_string(),
        netns: netns.map(PathBuf::from),
        if_name: "eth0".to_string(),
        args: String::new(),
        stdin_data: serde_json::to_vec(&conf).unwrap(),
    }
}

fn vpp_conf(ipam_type: &str) -> Value {
    json!({
        "cniVersion": "0.3.1",
        "name": "userspace-vpp",
        "type": "userspace",
        "hostConf": { "engine": "vpp", "iftype": "memif" },
        "ipam": { "type": ipam_type }
    })
}

// =============================================================================
// ADD
// =============================================================================

#[test]
fn test_add_without_ipam_reports_empty_result() {
    let h = HarnessBuilder::new().build();
    let result = h.plugin.cmd_add(&cmd_args(vpp_conf(""), Some("/var/run/netns/a"))).unwrap();

    assert_eq!(result, json!({ "cniVersion": "0.3.1" }));
    assert_eq!(
        h.calls(),
        vec!["attach_on_host:vpp", "attach_on_container:vpp"],
        "IPAM must not run without ipam.type"
    );
    assert_eq!(h.container_ip(), Some(IpData::default()));
}

#[test]
fn test_add_without_ipam_section() {
    let h = HarnessBuilder::new().build();
    let conf = json!({ "cniVersion": "0.3.1", "hostConf": { "engine": "vpp" } });

    assert!(h.plugin.cmd_add(&cmd_args(conf, None)).is_ok());
    assert!(!h.calls().iter().any(|c| c.starts_with("ipam")));
}

#[test]
fn test_add_host_attach_runs_first_and_once() {
    let h = HarnessBuilder::new().build();
    h.plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), Some("/var/run/netns/a")))
        .unwrap();

    let calls = h.calls();
    assert_eq!(
        calls,
        vec![
            "attach_on_host:vpp",
            "ipam_allocate:host-local",
            "attach_on_container:vpp"
        ]
    );
    assert_eq!(calls.iter().filter(|c| *c == "attach_on_host:vpp").count(), 1);
}

#[test]
fn test_add_passes_ipam_address_to_container_engine() {
    let h = HarnessBuilder::new().build();
    h.plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap();

    assert_eq!(
        h.container_ip(),
        Some(IpData {
            is_ipv6: false,
            address: "10.56.217.2".to_string(),
            prefix_len: 24,
        })
    );
}

#[test]
fn test_add_clears_gateway_in_result() {
    let h = HarnessBuilder::new().build();
    let result = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap();

    assert_eq!(result["ips"][0]["address"], "10.56.217.2/24");
    assert!(result["ips"][0].get("gateway").is_none());
}

#[test]
fn test_add_selects_first_address_of_mixed_families() {
    let h = HarnessBuilder::new()
        .ipam_result(json!({
            "cniVersion": "0.3.1",
            "ips": [
                { "version": "6", "address": "fd00:10::5/64" },
                { "version": "4", "address": "10.1.0.5/16" }
            ]
        }))
        .build();
    let result = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap();

    let ip = h.container_ip().unwrap();
    assert!(ip.is_ipv6);
    assert_eq!(ip.address, "fd00:10::5");
    assert_eq!(ip.prefix_len, 64);
    assert_eq!(result["ips"].as_array().unwrap().len(), 2, "result keeps all addresses");
}

#[test]
fn test_add_reports_legacy_layout_for_old_versions() {
    let h = HarnessBuilder::new().build();
    let mut conf = vpp_conf("host-local");
    conf["cniVersion"] = json!("0.2.0");

    let result = h.plugin.cmd_add(&cmd_args(conf, None)).unwrap();

    assert_eq!(result["cniVersion"], "0.2.0");
    assert_eq!(result["ip4"]["ip"], "10.56.217.2/24");
    assert!(result.get("ips").is_none());
}

#[test]
fn test_add_unknown_host_engine() {
    let h = HarnessBuilder::new().build();
    let conf = json!({ "cniVersion": "0.3.1", "hostConf": { "engine": "bogus" } });

    let err = h.plugin.cmd_add(&cmd_args(conf, None)).unwrap_err();

    match &err {
        Error::UnknownEngine { role, name } => {
            assert_eq!(*role, EngineRole::Host);
            assert_eq!(name, "bogus");
        }
        other => panic!("expected UnknownEngine, got {other:?}"),
    }
    assert!(err.to_string().contains("bogus"));
    assert!(h.calls().is_empty());
}

#[test]
fn test_add_unsupported_host_engine() {
    let h = HarnessBuilder::new().build();
    let conf = json!({ "cniVersion": "0.3.1", "hostConf": { "engine": "ovs-dpdk" } });

    let err = h.plugin.cmd_add(&cmd_args(conf, None)).unwrap_err();

    assert!(matches!(
        &err,
        Error::UnsupportedEngine { role: EngineRole::Host, name } if name == "ovs-dpdk"
    ));
    assert!(h.calls().is_empty());
}

#[test]
fn test_add_no_address_after_host_attach() {
    let h = HarnessBuilder::new()
        .ipam_result(json!({ "cniVersion": "0.3.1", "ips": [] }))
        .build();

    let err = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap_err();

    assert!(matches!(&err, Error::NoAddress { plugin } if plugin == "host-local"));
    assert_eq!(
        h.calls(),
        vec!["attach_on_host:vpp", "ipam_allocate:host-local"],
        "host attach stays in place, nothing is detached"
    );
}

#[test]
fn test_add_ipam_failure_is_fatal() {
    let h = HarnessBuilder::new().ipam_fail().build();

    let err = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap_err();

    assert!(matches!(err, Error::Ipam { .. }));
    assert!(!h.calls().iter().any(|c| c.starts_with("attach_on_container")));
}

#[test]
fn test_add_unconvertible_ipam_result() {
    let h = HarnessBuilder::new()
        .ipam_result(json!({ "cniVersion": "9.9.9", "ips": [] }))
        .build();

    let err = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap_err();

    assert!(matches!(err, Error::Ipam { .. }));
}

#[test]
fn test_add_host_engine_failure_aborts() {
    let h = HarnessBuilder::new().fail_on("attach_on_host").build();

    let err = h
        .plugin
        .cmd_add(&cmd_args(vpp_conf("host-local"), None))
        .unwrap_err();

    match err {
        Error::Engine { role, engine, reason } => {
            assert_eq!(role, EngineRole::Host);
            assert_eq!(engine, "vpp");
            assert!(reason.contains("exploded"));
        }
        other => panic!("expected Engine error, got {other:?}"),
    }
    assert_eq!(h.calls(), vec!["attach_on_host:vpp"]);
}

#[test]
fn test_add_container_engine_failure_has_no_rollback() {
    let h = HarnessBuilder::new().fail_on("attach_on_container").build();

    let err = h.plugin.cmd_add(&cmd_args(vpp_conf(""), None)).unwrap_err();

    assert!(matches!(
        err,
        Error::Engine {
            role: EngineRole::Container,
            ..
        }
    ));
    assert!(!h.calls().iter().any(|c| c.starts_with("detach")));
}

#[test]
fn test_add_unknown_container_engine_after_host_attach() {
    let h = HarnessBuilder::new().build();
    let conf = json!({
        "cniVersion": "0.3.1",
        "hostConf": { "engine": "vpp" },
        "containerConf": { "engine": "dpdk-app" }
    });

    let err = h.plugin.cmd_add(&cmd_args(conf, None)).unwrap_err();

    assert!(matches!(
        &err,
        Error::UnknownEngine { role: EngineRole::Container, name } if name == "dpdk-app"
    ));
    assert_eq!(h.calls(), vec!["attach_on_host:vpp"]);
}

#[test]
fn test_add_malformed_config() {
    let h = HarnessBuilder::new().build();
    let mut args = cmd_args(json!({}), None);
    args.stdin_data = b"{ not json".to_vec();

    let err = h.plugin.cmd_add(&args).unwrap_err();

    assert!(matches!(err, Error::ConfigLoad(_)));
    assert!(h.calls().is_empty());
}

// =============================================================================
// DEL
// =============================================================================

#[test]
fn test_del_without_ipam_skips_release() {
    let h = HarnessBuilder::new().build();
    h.plugin
        .cmd_del(&cmd_args(vpp_conf(""), Some("/var/run/netns/a")))
        .unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "detach_from_host:vpp",
            "detach_from_container:vpp",
            "delete_link:/var/run/netns/a:eth0"
        ]
    );
}

#[test]
fn test_del_order_with_ipam() {
    let h = HarnessBuilder::new().build();
    h.plugin
        .cmd_del(&cmd_args(vpp_conf("host-local"), Some("/var/run/netns/a")))
        .unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "detach_from_host:vpp",
            "detach_from_container:vpp",
            "ipam_release:host-local",
            "delete_link:/var/run/netns/a:eth0"
        ]
    );
}

#[test]
fn test_del_without_netns_skips_link_removal() {
    let h = HarnessBuilder::new().build();
    h.plugin
        .cmd_del(&cmd_args(vpp_conf("host-local"), None))
        .unwrap();

    assert!(!h.calls().iter().any(|c| c.starts_with("delete_link")));
    assert!(h.calls().contains(&"ipam_release:host-local".to_string()));
}

#[test]
fn test_del_is_idempotent() {
    let h = HarnessBuilder::new().build();
    let args = cmd_args(vpp_conf("host-local"), Some("/var/run/netns/a"));

    h.plugin.cmd_del(&args).unwrap();
    h.plugin
        .cmd_del(&args)
        .expect("second DEL tolerates the missing link");
}

#[test]
fn test_del_link_failure_is_fatal() {
    let h = HarnessBuilder::new()
        .link(LinkBehavior::Broken("operation not permitted"))
        .build();

    let err = h
        .plugin
        .cmd_del(&cmd_args(vpp_conf(""), Some("/var/run/netns/a")))
        .unwrap_err();

    match err {
        Error::NamespaceCleanup {
            netns,
            if_name,
            reason,
        } => {
            assert_eq!(netns, PathBuf::from("/var/run/netns/a"));
            assert_eq!(if_name, "eth0");
            assert!(reason.contains("not permitted"));
        }
        other => panic!("expected NamespaceCleanup, got {other:?}"),
    }
}

#[test]
fn test_del_unsupported_container_engine() {
    let h = HarnessBuilder::new().build();
    let conf = json!({
        "cniVersion": "0.3.1",
        "hostConf": { "engine": "vpp" },
        "containerConf": { "engine": "ovs-dpdk" }
    });

    let err = h.plugin.cmd_del(&cmd_args(conf, None)).unwrap_err();

    assert!(matches!(
        err,
        Error::UnsupportedEngine {
            role: EngineRole::Container,
            ..
        }
    ));
    assert_eq!(h.calls(), vec!["detach_from_host:vpp"]);
}

#[test]
fn test_del_host_engine_failure_stops_teardown() {
    let h = HarnessBuilder::new().fail_on("detach_from_host").build();

    let err = h
        .plugin
        .cmd_del(&cmd_args(vpp_conf("host-local"), Some("/var/run/netns/a")))
        .unwrap_err();

    assert!(matches!(err, Error::Engine { role: EngineRole::Host, .. }));
    assert_eq!(h.calls(), vec!["detach_from_host:vpp"]);
}

// =============================================================================
// Engine Defaulting
// =============================================================================

#[test]
fn test_container_engine_defaults_to_host_engine() {
    let h = HarnessBuilder::new().build();
    let conf = json!({
        "cniVersion": "0.3.1",
        "hostConf": { "engine": "vpp" },
        "containerConf": { "iftype": "memif" }
    });

    h.plugin.cmd_add(&cmd_args(conf.clone(), None)).unwrap();
    h.plugin.cmd_del(&cmd_args(conf, None)).unwrap();

    assert_eq!(
        h.calls(),
        vec![
            "attach_on_host:vpp",
            "attach_on_container:vpp",
            "detach_from_host:vpp",
            "detach_from_container:vpp"
        ]
    );
}
