//! Target expansion
//!
//! Turns raw target specs (single address, address block, hostname) into the
//! flat host list a scan probes. Hostnames are passed through untouched; DNS
//! resolution is left to the transport at fetch time.

use crate::error::ScanError;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Expands target specs into hosts
pub trait TargetExpander: Send + Sync {
    /// Expand `specs` in order; fails without a partial list when the total
    /// exceeds `max_targets`
    fn expand(&self, specs: &[String], max_targets: usize) -> crate::Result<Vec<String>>;
}

/// One classified target spec
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSpec {
    Address(IpAddr),
    Block(IpNetwork),
    Hostname(String),
}

impl TargetSpec {
    /// Classify a trimmed spec. Anything that is not an address or a block
    /// is treated as a hostname.
    pub fn parse(spec: &str) -> Self {
        if spec.contains('/') {
            if let Ok(network) = IpNetwork::from_str(spec) {
                return TargetSpec::Block(network);
            }
        } else if let Ok(addr) = IpAddr::from_str(spec) {
            return TargetSpec::Address(addr);
        }

        TargetSpec::Hostname(spec.to_string())
    }

    /// Number of hosts this spec expands to
    pub fn host_count(&self) -> u128 {
        match self {
            TargetSpec::Address(_) | TargetSpec::Hostname(_) => 1,
            TargetSpec::Block(IpNetwork::V4(net)) => {
                let (first, last) = v4_host_range(net);
                u128::from(last - first) + 1
            }
            TargetSpec::Block(IpNetwork::V6(net)) => {
                let (first, last) = v6_host_range(net);
                (last - first).saturating_add(1)
            }
        }
    }

    fn push_hosts(&self, original: &str, hosts: &mut Vec<String>) {
        match self {
            TargetSpec::Address(_) | TargetSpec::Hostname(_) => hosts.push(original.to_string()),
            TargetSpec::Block(IpNetwork::V4(net)) => {
                let (first, last) = v4_host_range(net);
                hosts.extend((first..=last).map(|a| Ipv4Addr::from(a).to_string()));
            }
            TargetSpec::Block(IpNetwork::V6(net)) => {
                let (first, last) = v6_host_range(net);
                hosts.extend((first..=last).map(|a| Ipv6Addr::from(a).to_string()));
            }
        }
    }
}

/// Usable IPv4 host range: network and broadcast excluded except for /31 and /32
fn v4_host_range(net: &Ipv4Network) -> (u32, u32) {
    let prefix = u32::from(net.prefix());
    let host_bits = 32 - prefix;
    let network = u32::from(net.network());
    let broadcast = if host_bits == 32 {
        u32::MAX
    } else {
        network | ((1u32 << host_bits) - 1)
    };

    if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    }
}

/// Usable IPv6 host range: the subnet-router anycast address is excluded
/// except for /127 and /128
fn v6_host_range(net: &Ipv6Network) -> (u128, u128) {
    let prefix = u32::from(net.prefix());
    let host_bits = 128 - prefix;
    let network = u128::from(net.network());
    let last = if host_bits == 128 {
        u128::MAX
    } else {
        network | ((1u128 << host_bits) - 1)
    };

    if prefix >= 127 {
        (network, last)
    } else {
        (network + 1, last)
    }
}

/// Default expander over IP addresses, CIDR blocks and hostnames
#[derive(Debug, Clone, Default)]
pub struct CidrTargetExpander;

impl CidrTargetExpander {
    pub fn new() -> Self {
        Self
    }
}

impl TargetExpander for CidrTargetExpander {
    fn expand(&self, specs: &[String], max_targets: usize) -> crate::Result<Vec<String>> {
        let parsed: Vec<(&str, TargetSpec)> = specs
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| (s, TargetSpec::parse(s)))
            .collect();

        // Count before materialising so an oversized block never allocates
        let total = parsed
            .iter()
            .fold(0u128, |acc, (_, spec)| acc.saturating_add(spec.host_count()));

        if total > max_targets as u128 {
            log::warn!(
                "Expanded targets exceed max: {} > {}",
                total,
                max_targets
            );
            return Err(ScanError::LimitExceeded {
                found: usize::try_from(total).unwrap_or(usize::MAX),
                max: max_targets,
            });
        }

        let mut hosts = Vec::with_capacity(total as usize);
        for (original, spec) in &parsed {
            spec.push_hosts(original, &mut hosts);
        }

        log::info!("Expanded {} target specs to {} hosts", specs.len(), hosts.len());
        Ok(hosts)
    }
}
