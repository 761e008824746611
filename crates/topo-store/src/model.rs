//! Entity records of the persisted topology graph.
//!
//! Entities reference each other by identity ([`NodeId`], [`InterfaceId`],
//! ...) rather than by pointer. Interface parent links are plain identity
//! lists, which keeps the graph free of ownership cycles and lets the
//! reconciler sort it like any other graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use topo_types::{IpPrefix, MacAddress, VlanTag};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a managed host.
    NodeId,
    "node"
);
entity_id!(
    /// Identity of an interface record.
    InterfaceId,
    "iface"
);
entity_id!(
    /// Identity of a fabric.
    FabricId,
    "fabric"
);
entity_id!(
    /// Identity of a VLAN record (not the 802.1Q tag, see [`VlanTag`]).
    VlanId,
    "vlan"
);
entity_id!(
    /// Identity of a subnet.
    SubnetId,
    "subnet"
);
entity_id!(
    /// Identity of an IP address record.
    AddressId,
    "ip"
);

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    New,
    Commissioning,
    Testing,
    Ready,
    Allocated,
    Deploying,
    Deployed,
    Broken,
    Rescue,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::New => "new",
            NodeStatus::Commissioning => "commissioning",
            NodeStatus::Testing => "testing",
            NodeStatus::Ready => "ready",
            NodeStatus::Allocated => "allocated",
            NodeStatus::Deploying => "deploying",
            NodeStatus::Deployed => "deployed",
            NodeStatus::Broken => "broken",
            NodeStatus::Rescue => "rescue",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "new" => NodeStatus::New,
            "commissioning" => NodeStatus::Commissioning,
            "testing" => NodeStatus::Testing,
            "ready" => NodeStatus::Ready,
            "allocated" => NodeStatus::Allocated,
            "deploying" => NodeStatus::Deploying,
            "deployed" => NodeStatus::Deployed,
            "broken" => NodeStatus::Broken,
            "rescue" => NodeStatus::Rescue,
            other => return Err(format!("unknown node status '{other}'")),
        })
    }
}

/// A managed host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub is_controller: bool,
    #[serde(default)]
    pub is_pod: bool,
    /// Interface the node boots from, if designated.
    #[serde(default)]
    pub boot_interface: Option<InterfaceId>,
}

impl Node {
    /// True while observed addresses are provisional rather than intended.
    ///
    /// Deployed (or deploying) machines, pods and controllers report
    /// addresses that are authoritative.
    pub fn is_commissioning(&self) -> bool {
        !matches!(self.status, NodeStatus::Deploying | NodeStatus::Deployed)
            && !self.is_pod
            && !self.is_controller
    }

    /// True when newly created interfaces count as in use by the node.
    pub fn acquires_interfaces(&self) -> bool {
        self.is_controller || self.status == NodeStatus::Deployed
    }
}

/// Interface kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Physical => "physical",
            InterfaceKind::Bond => "bond",
            InterfaceKind::Bridge => "bridge",
            InterfaceKind::Vlan => "vlan",
        }
    }

    /// Checks a parent count against the kind's arity.
    pub fn accepts_parent_count(&self, count: usize) -> bool {
        match self {
            InterfaceKind::Physical => count == 0,
            InterfaceKind::Vlan => count == 1,
            InterfaceKind::Bond | InterfaceKind::Bridge => true,
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery services enabled on an interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub neighbour: bool,
    pub mdns: bool,
}

/// Hardware inventory of the port backing a physical interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDetails {
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub firmware_version: Option<String>,
    pub numa_node: Option<u32>,
    pub sriov_max_vf: Option<u32>,
    pub link_connected: bool,
    /// Negotiated speed in Mbit/s.
    pub link_speed: Option<u64>,
    /// Maximum supported speed in Mbit/s.
    pub interface_speed: Option<u64>,
}

/// A network interface owned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub node: NodeId,
    pub name: String,
    pub kind: InterfaceKind,
    pub mac_address: Option<MacAddress>,
    pub enabled: bool,
    /// Parents in declared order.
    pub parents: Vec<InterfaceId>,
    pub vlan: Option<VlanId>,
    #[serde(default)]
    pub acquired: bool,
    #[serde(default)]
    pub discovery: DiscoveryState,
    #[serde(default)]
    pub port: Option<PortDetails>,
}

impl Interface {
    /// Parents as a set, for identity comparisons that ignore order.
    pub fn parent_set(&self) -> BTreeSet<InterfaceId> {
        self.parents.iter().copied().collect()
    }
}

/// Fields required to create an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInterface {
    pub node: NodeId,
    pub name: String,
    pub kind: InterfaceKind,
    pub mac_address: Option<MacAddress>,
    pub enabled: bool,
    pub parents: Vec<InterfaceId>,
    pub vlan: Option<VlanId>,
    pub acquired: bool,
}

/// A layer-2 domain grouping VLANs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fabric {
    pub id: FabricId,
    pub name: String,
    pub default_vlan: VlanId,
}

/// A VLAN inside a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    pub fabric: FabricId,
    pub vid: VlanTag,
}

/// An IP network bound to one VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub name: String,
    pub cidr: IpPrefix,
    pub gateway: Option<IpAddr>,
    pub vlan: VlanId,
}

/// Fields required to create a subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubnet {
    pub name: String,
    pub cidr: IpPrefix,
    pub gateway: Option<IpAddr>,
    pub vlan: VlanId,
}

/// Why an IP address record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocClass {
    /// Dynamic lease placeholder, address not yet known.
    DhcpPending,
    /// Passively observed; rebuilt on every reconciliation.
    Discovered,
    /// Fixed and intended.
    Sticky,
    /// Reserved by an external party.
    UserReserved,
}

impl AllocClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocClass::DhcpPending => "dhcp_pending",
            AllocClass::Discovered => "discovered",
            AllocClass::Sticky => "sticky",
            AllocClass::UserReserved => "user_reserved",
        }
    }
}

/// An IP lease/assignment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressRecord {
    pub id: AddressId,
    pub ip: Option<IpAddr>,
    pub alloc: AllocClass,
    pub subnet: Option<SubnetId>,
    /// Interfaces the record is attached to. Maintained by the store's
    /// attach/detach operations only.
    #[serde(default)]
    pub interfaces: BTreeSet<InterfaceId>,
}

/// Fields required to create an IP address record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAddress {
    pub ip: Option<IpAddr>,
    pub alloc: AllocClass,
    pub subnet: Option<SubnetId>,
}
