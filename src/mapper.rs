//! Narrowing of IPAM results to the single address engines consume.

use crate::error::{Error, Result};
use crate::types::{CniResult, IpData};

/// Picks the address handed to the container-side engine.
///
/// The first `"4"` or `"6"` record in result order wins; the rest are
/// ignored because engines take one address per interface.
pub fn select_ip_data(plugin: &str, result: &CniResult) -> Result<IpData> {
    result
        .ips
        .iter()
        .find_map(|ip| {
            let is_ipv6 = match ip.version.as_str() {
                "4" => false,
                "6" => true,
                _ => return None,
            };
            Some(IpData {
                is_ipv6,
                address: ip.address.ip().to_string(),
                prefix_len: ip.address.prefix(),
            })
        })
        .ok_or_else(|| Error::NoAddress {
            plugin: plugin.to_string(),
        })
}

/// Drops IPAM-provided gateways; this plugin never reports them.
pub fn clear_gateways(result: &mut CniResult) {
    for ip in &mut result.ips {
        ip.gateway = None;
    }
}
