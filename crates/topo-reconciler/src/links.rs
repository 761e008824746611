//! Observed links: the IP configuration reported for one interface.

use crate::snapshot::{AddressExtra, NetworkEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use topo_store::AllocClass;
use topo_types::IpPrefix;
use tracing::warn;

/// One IP configuration observed on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedLink {
    /// Dynamically configured; the leased address is known when the
    /// host already holds one.
    Dynamic { address: Option<IpPrefix> },
    /// Statically configured.
    Fixed {
        address: IpPrefix,
        gateway: Option<IpAddr>,
        /// Overrides the allocation class the engine would pick.
        alloc_hint: Option<AllocClass>,
    },
}

impl ObservedLink {
    pub fn address(&self) -> Option<IpPrefix> {
        match self {
            ObservedLink::Dynamic { address } => *address,
            ObservedLink::Fixed { address, .. } => Some(*address),
        }
    }

    fn address_mut(&mut self) -> Option<&mut IpPrefix> {
        match self {
            ObservedLink::Dynamic { address } => address.as_mut(),
            ObservedLink::Fixed { address, .. } => Some(address),
        }
    }
}

/// Builds the observed links of a snapshot entry.
///
/// Only globally scoped addresses are kept. Each address is overlaid with
/// the mode and gateway configured for the same IP in `extra`. Addresses
/// or netmasks that do not parse skip the link; a gateway that does not
/// parse is dropped.
pub fn build_links(
    ifname: &str,
    entry: &NetworkEntry,
    extra: &BTreeMap<IpAddr, AddressExtra>,
    widen_host_prefixes: bool,
) -> Vec<ObservedLink> {
    let mut links = Vec::new();

    for reported in entry.addresses.iter().filter(|a| a.scope == "global") {
        let ip: IpAddr = match reported.address.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(interface = ifname, address = %reported.address, "Skipping malformed address");
                continue;
            }
        };
        let prefix = match IpPrefix::with_netmask(ip, &reported.netmask.to_string()) {
            Ok(prefix) => prefix,
            Err(e) => {
                warn!(interface = ifname, address = %ip, error = %e, "Skipping link with malformed netmask");
                continue;
            }
        };

        let (mode, gateway) = match extra.get(&ip) {
            Some(overlay) => (Some(overlay.mode.as_str()), overlay.gateway.as_deref()),
            None => (reported.mode.as_deref(), reported.gateway.as_deref()),
        };

        let link = if mode == Some("dhcp") {
            ObservedLink::Dynamic {
                address: Some(prefix),
            }
        } else {
            ObservedLink::Fixed {
                address: prefix,
                gateway: gateway.and_then(|gw| parse_gateway(ifname, gw)),
                alloc_hint: None,
            }
        };
        links.push(link);
    }

    if widen_host_prefixes {
        widen_host_links(&mut links);
    }
    links
}

fn parse_gateway(ifname: &str, gateway: &str) -> Option<IpAddr> {
    match gateway.trim().parse() {
        Ok(gw) => Some(gw),
        Err(_) => {
            warn!(interface = ifname, gateway, "Ignoring malformed gateway");
            None
        }
    }
}

/// Rewrites /32 and /128 links to the most specific non-host prefix among
/// the other links that contains them.
fn widen_host_links(links: &mut [ObservedLink]) {
    let networks: Vec<IpPrefix> = links
        .iter()
        .filter_map(ObservedLink::address)
        .filter(|prefix| !prefix.is_host_route())
        .collect();

    for link in links.iter_mut() {
        let Some(address) = link.address_mut() else {
            continue;
        };
        if !address.is_host_route() {
            continue;
        }
        let ip = address.address();
        let closest = networks
            .iter()
            .filter(|net| net.contains(&ip))
            .max_by_key(|net| net.prefix_len());
        if let Some(net) = closest {
            if let Ok(widened) = IpPrefix::new(ip, net.prefix_len()) {
                *address = widened;
            }
        }
    }
}

/// The distinct networks the links are on.
pub fn link_networks(links: &[ObservedLink]) -> BTreeSet<IpPrefix> {
    links
        .iter()
        .filter_map(ObservedLink::address)
        .map(|prefix| prefix.network())
        .collect()
}
