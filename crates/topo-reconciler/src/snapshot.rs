//! Input snapshot schema.
//!
//! A snapshot is the JSON document a host reports about its own network
//! inventory. Only the fields the engine reads are modeled; unknown fields
//! are ignored. Values that need validation (hardware addresses, IPs,
//! netmasks, tags) stay textual or wide here so that one malformed entry
//! skips that entry instead of rejecting the whole document.

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

/// A host's reported network inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,

    #[serde(default)]
    pub resources: Resources,

    #[serde(rename = "network-extra", default)]
    pub network_extra: Option<NetworkExtra>,
}

/// One entry of `networks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub hwaddr: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
    #[serde(default)]
    pub bridge: Option<BridgeEntry>,
    #[serde(default)]
    pub bond: Option<BondEntry>,
    #[serde(default)]
    pub vlan: Option<VlanEntry>,
}

/// How a snapshot entry is shaped, derived from its sub-objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryShape<'a> {
    Physical,
    Bridge(&'a [String]),
    Bond(&'a [String]),
    Vlan(&'a VlanEntry),
}

impl NetworkEntry {
    /// Entries of any other type are not modeled.
    pub fn is_broadcast(&self) -> bool {
        self.kind == "broadcast"
    }

    pub fn is_up(&self) -> bool {
        self.state == "up"
    }

    pub fn shape(&self) -> EntryShape<'_> {
        if let Some(vlan) = &self.vlan {
            EntryShape::Vlan(vlan)
        } else if let Some(bridge) = &self.bridge {
            EntryShape::Bridge(&bridge.upper_devices)
        } else if let Some(bond) = &self.bond {
            EntryShape::Bond(&bond.lower_devices)
        } else {
            EntryShape::Physical
        }
    }

    /// Names this entry declares as parents, in declared order.
    pub fn declared_parents(&self) -> Vec<&str> {
        match self.shape() {
            EntryShape::Physical => Vec::new(),
            EntryShape::Bridge(parents) | EntryShape::Bond(parents) => {
                parents.iter().map(String::as_str).collect()
            }
            EntryShape::Vlan(vlan) => vec![vlan.lower_device.as_str()],
        }
    }
}

/// A netmask given either as a number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Netmask {
    Length(u32),
    Text(String),
}

impl fmt::Display for Netmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Netmask::Length(len) => write!(f, "{len}"),
            Netmask::Text(text) => f.write_str(text),
        }
    }
}

/// One reported address of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub netmask: Netmask,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEntry {
    #[serde(default)]
    pub upper_devices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondEntry {
    #[serde(default)]
    pub lower_devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanEntry {
    pub vid: i64,
    pub lower_device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub network: NetworkResources,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResources {
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// A network card from the hardware inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub numa_node: Option<u32>,
    #[serde(default)]
    pub sriov: Option<Sriov>,
    #[serde(default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sriov {
    #[serde(default)]
    pub maximum_vfs: u32,
}

/// A port of a network card; `id` is the interface name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub link_detected: bool,
    #[serde(default)]
    pub link_speed: Option<u64>,
    #[serde(default)]
    pub max_speed: Option<u64>,
}

/// Controller-collected extras.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkExtra {
    #[serde(default)]
    pub hints: Vec<Hint>,
    #[serde(rename = "monitored-interfaces", default)]
    pub monitored_interfaces: Vec<String>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, ExtraInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraInterface {
    #[serde(default)]
    pub links: Vec<ExtraLink>,
}

/// A configured link, `address` in `ip/prefix` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraLink {
    pub address: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

/// A link-layer discovery (beaconing) observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub hint: String,
    #[serde(default)]
    pub ifname: Option<String>,
    #[serde(default)]
    pub vid: Option<i64>,
    #[serde(default)]
    pub related_ifname: Option<String>,
    #[serde(default)]
    pub related_vid: Option<i64>,
    #[serde(default)]
    pub related_mac: Option<String>,
}

/// Hint kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    OnRemoteNetwork,
    RoutableTo,
    RxOwnBeaconOnOtherInterface,
    SameLocalFabricAs,
}

impl HintKind {
    pub fn parse(hint: &str) -> Option<Self> {
        match hint {
            "on_remote_network" => Some(HintKind::OnRemoteNetwork),
            "routable_to" => Some(HintKind::RoutableTo),
            "rx_own_beacon_on_other_interface" => Some(HintKind::RxOwnBeaconOnOtherInterface),
            "same_local_fabric_as" => Some(HintKind::SameLocalFabricAs),
            _ => None,
        }
    }

    /// Own-node kinds relate two interfaces of the same host.
    pub fn is_own_node(&self) -> bool {
        matches!(
            self,
            HintKind::RxOwnBeaconOnOtherInterface | HintKind::SameLocalFabricAs
        )
    }
}

impl Hint {
    pub fn kind(&self) -> Option<HintKind> {
        HintKind::parse(&self.hint)
    }

    /// True for hints observed without any VLAN tag on either side.
    pub fn is_untagged(&self) -> bool {
        self.vid.is_none() && self.related_vid.is_none()
    }
}

/// Mode/gateway overlay from `network-extra`, keyed by IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressExtra {
    pub mode: String,
    pub gateway: Option<String>,
}

impl Snapshot {
    /// Decodes a snapshot from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ReconcileError::snapshot(e.to_string()))
    }

    /// Reads and decodes a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Interface name to declared parents, restricted to parents that are
    /// themselves part of the snapshot.
    pub fn dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.networks
            .iter()
            .map(|(name, entry)| {
                let parents = entry
                    .declared_parents()
                    .into_iter()
                    .filter(|parent| self.networks.contains_key(*parent))
                    .map(str::to_string)
                    .collect();
                (name.clone(), parents)
            })
            .collect()
    }

    /// Finds the hardware inventory port for an interface name.
    pub fn card_port(&self, name: &str) -> Option<(&Card, &Port)> {
        self.resources.network.cards.iter().find_map(|card| {
            card.ports
                .iter()
                .find(|port| port.id == name)
                .map(|port| (card, port))
        })
    }

    pub fn hints(&self) -> &[Hint] {
        self.network_extra
            .as_ref()
            .map_or(&[], |extra| extra.hints.as_slice())
    }

    pub fn is_monitored(&self, name: &str) -> bool {
        self.network_extra
            .as_ref()
            .is_some_and(|extra| extra.monitored_interfaces.iter().any(|m| m == name))
    }

    /// Builds the per-IP mode/gateway overlay from configured links.
    ///
    /// Links whose address does not parse are ignored. A link without a
    /// mode is static.
    pub fn address_extra(&self) -> BTreeMap<IpAddr, AddressExtra> {
        let mut extra = BTreeMap::new();
        let Some(network_extra) = &self.network_extra else {
            return extra;
        };
        for interface in network_extra.interfaces.values() {
            for link in &interface.links {
                let ip_text = link
                    .address
                    .split_once('/')
                    .map_or(link.address.as_str(), |(ip, _)| ip);
                if let Ok(ip) = ip_text.trim().parse::<IpAddr>() {
                    extra.insert(
                        ip,
                        AddressExtra {
                            mode: link.mode.clone().unwrap_or_else(|| "static".to_string()),
                            gateway: link.gateway.clone(),
                        },
                    );
                }
            }
        }
        extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SNAPSHOT: &str = r#"{
        "networks": {
            "eth0": {
                "type": "broadcast", "hwaddr": "52:54:00:00:00:01", "state": "up",
                "addresses": [
                    {"address": "10.0.0.5", "netmask": "24", "scope": "global"},
                    {"address": "fe80::1", "netmask": 64, "scope": "link"}
                ],
                "bridge": null, "bond": null, "vlan": null
            },
            "eth0.10": {
                "type": "broadcast", "hwaddr": "52:54:00:00:00:01", "state": "up",
                "addresses": [],
                "vlan": {"vid": 10, "lower_device": "eth0"}
            },
            "br0": {
                "type": "broadcast", "hwaddr": "52:54:00:00:00:09", "state": "up",
                "addresses": [],
                "bridge": {"upper_devices": ["eth0", "tap0"]}
            },
            "lo": {"type": "loopback", "hwaddr": "", "state": "up", "addresses": []}
        },
        "resources": {"network": {"cards": [
            {"vendor": "Intel", "numa_node": 0, "sriov": {"maximum_vfs": 8},
             "ports": [{"id": "eth0", "address": "52:54:00:00:00:01", "link_detected": true}]}
        ]}},
        "network-extra": {
            "hints": [{"hint": "routable_to", "ifname": "eth0", "related_mac": "52:54:00:00:00:aa"}],
            "monitored-interfaces": ["eth0"],
            "interfaces": {"eth0": {"links": [
                {"address": "10.0.0.5/24", "gateway": "10.0.0.1"},
                {"address": "10.0.1.5/24", "mode": "dhcp"}
            ]}}
        }
    }"#;

    #[test]
    fn test_decode_full_snapshot() {
        let snapshot = Snapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.networks.len(), 4);

        let eth0 = &snapshot.networks["eth0"];
        assert!(eth0.is_broadcast());
        assert!(eth0.is_up());
        assert_eq!(eth0.shape(), EntryShape::Physical);
        assert_eq!(eth0.addresses[0].netmask, Netmask::Text("24".to_string()));
        assert_eq!(eth0.addresses[1].netmask, Netmask::Length(64));
        assert!(!snapshot.networks["lo"].is_broadcast());

        assert!(snapshot.is_monitored("eth0"));
        assert!(!snapshot.is_monitored("br0"));
        assert_eq!(snapshot.hints()[0].kind(), Some(HintKind::RoutableTo));
    }

    #[test]
    fn test_dependencies_drop_unknown_parents() {
        let snapshot = Snapshot::from_json(SNAPSHOT).unwrap();
        let deps = snapshot.dependencies();
        assert_eq!(deps["br0"], vec!["eth0".to_string()]);
        assert_eq!(deps["eth0.10"], vec!["eth0".to_string()]);
        assert!(deps["eth0"].is_empty());
    }

    #[test]
    fn test_card_port_lookup() {
        let snapshot = Snapshot::from_json(SNAPSHOT).unwrap();
        let (card, port) = snapshot.card_port("eth0").unwrap();
        assert_eq!(card.vendor.as_deref(), Some("Intel"));
        assert!(port.link_detected);
        assert!(snapshot.card_port("br0").is_none());
    }

    #[test]
    fn test_address_extra_defaults_to_static() {
        let snapshot = Snapshot::from_json(SNAPSHOT).unwrap();
        let extra = snapshot.address_extra();
        let fixed = &extra[&"10.0.0.5".parse::<IpAddr>().unwrap()];
        assert_eq!(fixed.mode, "static");
        assert_eq!(fixed.gateway.as_deref(), Some("10.0.0.1"));
        assert_eq!(extra[&"10.0.1.5".parse::<IpAddr>().unwrap()].mode, "dhcp");
    }

    #[test]
    fn test_unknown_hint_kind() {
        assert_eq!(HintKind::parse("seen_by_unicorn"), None);
        assert!(HintKind::SameLocalFabricAs.is_own_node());
        assert!(!HintKind::OnRemoteNetwork.is_own_node());
    }

    #[test]
    fn test_out_of_range_vid_still_decodes() {
        let text = r#"{"networks": {
            "eth0.99": {
                "type": "broadcast", "hwaddr": "52:54:00:00:00:01", "state": "up",
                "addresses": [], "vlan": {"vid": 70000, "lower_device": "eth0"}
            }
        }, "network-extra": {"hints": [{"hint": "routable_to", "vid": -3}]}}"#;
        let snapshot = Snapshot::from_json(text).unwrap();
        let entry = &snapshot.networks["eth0.99"];
        assert_eq!(entry.vlan.as_ref().map(|vlan| vlan.vid), Some(70000));
        assert!(!snapshot.hints()[0].is_untagged());
    }

    #[test]
    fn test_malformed_json_is_snapshot_error() {
        let err = Snapshot::from_json("{\"networks\": 4}").unwrap_err();
        assert!(matches!(err, ReconcileError::Snapshot(_)));
    }
}
