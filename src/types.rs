//! CNI result types and version formatting.
//!
//! Results are held internally in the current (0.3.x+) layout. Legacy
//! (0.1.0/0.2.0) `ip4`/`ip6` documents are accepted from IPAM plugins and
//! produced when the runtime asks for an old version.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{LEGACY_CNI_VERSIONS, SUPPORTED_CNI_VERSIONS};
use crate::error::{Error, Result};

// =============================================================================
// IpData
// =============================================================================

/// The single address handed to engines.
///
/// The default value means no address was assigned (IPAM not configured,
/// or a DEL where no address is needed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpData {
    pub is_ipv6: bool,
    /// Address without prefix, e.g. `10.56.217.2`.
    pub address: String,
    /// Prefix length derived from the allocation mask.
    pub prefix_len: u8,
}

impl IpData {
    /// Returns true if an address was assigned.
    pub fn is_assigned(&self) -> bool {
        !self.address.is_empty()
    }
}

// =============================================================================
// Current Result Layout
// =============================================================================

/// Allocation result in the current CNI layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// One allocated address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpConfig {
    /// `"4"` or `"6"`.
    pub version: String,
    /// Index into `interfaces`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    pub address: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub dst: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_empty()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

// =============================================================================
// Legacy Result Layout (0.1.0 / 0.2.0)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    cni_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip4: Option<LegacyIpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip6: Option<LegacyIpConfig>,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    dns: Dns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LegacyIpConfig {
    ip: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    routes: Vec<Route>,
}

impl LegacyResult {
    fn into_current(self) -> CniResult {
        let mut result = CniResult {
            cni_version: self.cni_version,
            dns: self.dns,
            ..Default::default()
        };

        for (version, config) in [("4", self.ip4), ("6", self.ip6)] {
            let Some(config) = config else { continue };
            result.ips.push(IpConfig {
                version: version.to_string(),
                interface: None,
                address: config.ip,
                gateway: config.gateway,
            });
            result.routes.extend(config.routes);
        }

        result
    }

    fn from_current(result: &CniResult, version: &str) -> Self {
        let mut legacy = Self {
            cni_version: version.to_string(),
            dns: result.dns.clone(),
            ..Default::default()
        };

        // Older layouts hold one address per family.
        for ip in &result.ips {
            let slot = match ip.version.as_str() {
                "4" => &mut legacy.ip4,
                "6" => &mut legacy.ip6,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(LegacyIpConfig {
                    ip: ip.address,
                    gateway: ip.gateway,
                    routes: Vec::new(),
                });
            }
        }

        for route in &result.routes {
            let slot = if route.dst.is_ipv4() {
                legacy.ip4.as_mut()
            } else {
                legacy.ip6.as_mut()
            };
            if let Some(config) = slot {
                config.routes.push(route.clone());
            }
        }

        legacy
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Returns true if `version` is one this plugin can speak.
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_CNI_VERSIONS.contains(&version)
}

fn is_legacy_version(version: &str) -> bool {
    LEGACY_CNI_VERSIONS.contains(&version)
}

impl CniResult {
    /// Normalizes raw IPAM output into the current layout.
    ///
    /// Accepts either layout; the document's own `cniVersion` decides, with
    /// the presence of `ips` or `ip4`/`ip6` used when it is missing.
    pub fn from_ipam_output(raw: Value) -> Result<Self> {
        let version = raw
            .get("cniVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if !version.is_empty() && !is_supported_version(&version) {
            return Err(Error::Serialization(format!(
                "unsupported result version {version}"
            )));
        }

        let legacy = if version.is_empty() {
            raw.get("ips").is_none() && (raw.get("ip4").is_some() || raw.get("ip6").is_some())
        } else {
            is_legacy_version(&version)
        };

        if legacy {
            let result: LegacyResult = serde_json::from_value(raw)?;
            Ok(result.into_current())
        } else {
            Ok(serde_json::from_value(raw)?)
        }
    }

    /// Renders the result in the layout of the requested CNI version.
    pub fn to_version(&self, version: &str) -> Result<Value> {
        if !is_supported_version(version) {
            return Err(Error::IncompatibleVersion {
                requested: version.to_string(),
                supported: SUPPORTED_CNI_VERSIONS.join(", "),
            });
        }

        if is_legacy_version(version) {
            Ok(serde_json::to_value(LegacyResult::from_current(self, version))?)
        } else {
            let mut current = self.clone();
            current.cni_version = version.to_string();
            Ok(serde_json::to_value(current)?)
        }
    }
}
