//! In-memory [`TopologyStore`] implementation.

use crate::error::{StoreError, StoreResult};
use crate::model::{
    AddressId, Fabric, FabricId, Interface, InterfaceId, InterfaceKind, IpAddressRecord,
    NewAddress, NewInterface, NewSubnet, Node, NodeId, NodeStatus, Subnet, SubnetId, Vlan,
    VlanId,
};
use crate::store::TopologyStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use topo_types::{IpPrefix, MacAddress, VlanTag};
use tracing::{debug, trace};

/// The persisted records of a topology graph.
///
/// Tables are keyed by identity and never create entries implicitly: every
/// insertion goes through an explicit `create_*` operation on
/// [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    next_id: u64,
    pub nodes: BTreeMap<NodeId, Node>,
    pub interfaces: BTreeMap<InterfaceId, Interface>,
    pub fabrics: BTreeMap<FabricId, Fabric>,
    pub vlans: BTreeMap<VlanId, Vlan>,
    pub subnets: BTreeMap<SubnetId, Subnet>,
    pub addresses: BTreeMap<AddressId, IpAddressRecord>,
}

impl GraphState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A [`TopologyStore`] holding the whole graph in memory.
///
/// Counts every persisted change so callers can verify that reconciling an
/// unchanged snapshot is free of writes. The counter is not part of the
/// serialized state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GraphState", into = "GraphState")]
pub struct MemoryStore {
    state: GraphState,
    mutations: u64,
}

impl MemoryStore {
    /// Creates a store containing only the default fabric.
    pub fn new() -> Self {
        let mut store = MemoryStore {
            state: GraphState::default(),
            mutations: 0,
        };
        store.insert_fabric();
        store.mutations = 0;
        store
    }

    /// Wraps existing state. A state without any fabric gets a default one.
    pub fn from_state(state: GraphState) -> Self {
        let mut store = MemoryStore {
            state,
            mutations: 0,
        };
        if store.state.fabrics.is_empty() {
            store.insert_fabric();
            store.mutations = 0;
        }
        store
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn into_state(self) -> GraphState {
        self.state
    }

    fn record_mutation(&mut self, what: &str) {
        self.mutations += 1;
        trace!(mutation = self.mutations, "{}", what);
    }

    fn insert_fabric(&mut self) -> Fabric {
        let fabric_id = FabricId(self.state.allocate_id());
        let vlan_id = VlanId(self.state.allocate_id());
        let fabric = Fabric {
            id: fabric_id,
            name: format!("fabric-{}", fabric_id.0),
            default_vlan: vlan_id,
        };
        self.state.vlans.insert(
            vlan_id,
            Vlan {
                id: vlan_id,
                fabric: fabric_id,
                vid: VlanTag::UNTAGGED,
            },
        );
        self.state.fabrics.insert(fabric_id, fabric.clone());
        self.record_mutation("create fabric");
        fabric
    }

    fn check_interface_refs(
        &self,
        id: Option<InterfaceId>,
        node: NodeId,
        name: &str,
        kind: InterfaceKind,
        parents: &[InterfaceId],
        vlan: Option<VlanId>,
    ) -> StoreResult<()> {
        if !self.state.nodes.contains_key(&node) {
            return Err(StoreError::not_found("node", node));
        }
        if name.is_empty() {
            return Err(StoreError::invalid("interface", "name must not be empty"));
        }
        let duplicate = self
            .state
            .interfaces
            .values()
            .any(|i| i.node == node && i.name == name && Some(i.id) != id);
        if duplicate {
            return Err(StoreError::conflict(
                "interface",
                format!("{node} already has an interface named '{name}'"),
            ));
        }
        if !kind.accepts_parent_count(parents.len()) {
            return Err(StoreError::invalid(
                "interface",
                format!("{kind} interface '{name}' cannot have {} parents", parents.len()),
            ));
        }
        for parent in parents {
            if Some(*parent) == id {
                return Err(StoreError::invalid(
                    "interface",
                    format!("'{name}' cannot be its own parent"),
                ));
            }
            if !self.state.interfaces.contains_key(parent) {
                return Err(StoreError::not_found("interface", parent));
            }
        }
        if let Some(vlan) = vlan {
            if !self.state.vlans.contains_key(&vlan) {
                return Err(StoreError::not_found("vlan", vlan));
            }
        }
        Ok(())
    }

    fn check_address_refs(
        &self,
        id: Option<AddressId>,
        ip: Option<IpAddr>,
        subnet: Option<SubnetId>,
    ) -> StoreResult<()> {
        if let Some(ip) = ip {
            let taken = self
                .state
                .addresses
                .values()
                .any(|a| a.ip == Some(ip) && Some(a.id) != id);
            if taken {
                return Err(StoreError::conflict(
                    "address",
                    format!("{ip} is already recorded"),
                ));
            }
        }
        if let Some(subnet) = subnet {
            if !self.state.subnets.contains_key(&subnet) {
                return Err(StoreError::not_found("subnet", subnet));
            }
        }
        Ok(())
    }

    fn check_subnet_refs(&self, id: Option<SubnetId>, cidr: &IpPrefix, vlan: VlanId) -> StoreResult<()> {
        if cidr.network() != *cidr {
            return Err(StoreError::invalid(
                "subnet",
                format!("{cidr} has host bits set"),
            ));
        }
        if !self.state.vlans.contains_key(&vlan) {
            return Err(StoreError::not_found("vlan", vlan));
        }
        let taken = self
            .state
            .subnets
            .values()
            .any(|s| s.cidr == *cidr && Some(s.id) != id);
        if taken {
            return Err(StoreError::conflict(
                "subnet",
                format!("{cidr} already exists"),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl From<GraphState> for MemoryStore {
    fn from(state: GraphState) -> Self {
        MemoryStore::from_state(state)
    }
}

impl From<MemoryStore> for GraphState {
    fn from(store: MemoryStore) -> Self {
        store.state
    }
}

impl TopologyStore for MemoryStore {
    fn node(&self, id: NodeId) -> StoreResult<Node> {
        self.state
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("node", id))
    }

    fn find_node_by_hostname(&self, hostname: &str) -> Option<Node> {
        self.state
            .nodes
            .values()
            .find(|n| n.hostname == hostname)
            .cloned()
    }

    fn create_node(&mut self, hostname: &str, status: NodeStatus) -> StoreResult<Node> {
        if self.find_node_by_hostname(hostname).is_some() {
            return Err(StoreError::conflict(
                "node",
                format!("hostname '{hostname}' is taken"),
            ));
        }
        let node = Node {
            id: NodeId(self.state.allocate_id()),
            hostname: hostname.to_string(),
            status,
            is_controller: false,
            is_pod: false,
            boot_interface: None,
        };
        self.state.nodes.insert(node.id, node.clone());
        self.record_mutation("create node");
        debug!(node = %node.id, hostname, "Created node");
        Ok(node)
    }

    fn update_node(&mut self, node: &Node) -> StoreResult<bool> {
        let current = self
            .state
            .nodes
            .get(&node.id)
            .ok_or_else(|| StoreError::not_found("node", node.id))?;
        if current == node {
            return Ok(false);
        }
        if let Some(boot) = node.boot_interface {
            if !self.state.interfaces.contains_key(&boot) {
                return Err(StoreError::not_found("interface", boot));
            }
        }
        self.state.nodes.insert(node.id, node.clone());
        self.record_mutation("update node");
        Ok(true)
    }

    fn interface(&self, id: InterfaceId) -> StoreResult<Interface> {
        self.state
            .interfaces
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("interface", id))
    }

    fn interfaces_on_node(&self, node: NodeId) -> Vec<Interface> {
        self.state
            .interfaces
            .values()
            .filter(|i| i.node == node)
            .cloned()
            .collect()
    }

    fn find_interface_by_name(&self, node: NodeId, name: &str) -> Option<Interface> {
        self.state
            .interfaces
            .values()
            .find(|i| i.node == node && i.name == name)
            .cloned()
    }

    fn find_physical_by_mac(&self, mac: MacAddress, node: Option<NodeId>) -> Option<Interface> {
        self.state
            .interfaces
            .values()
            .find(|i| {
                i.kind == InterfaceKind::Physical
                    && i.mac_address == Some(mac)
                    && node.map_or(true, |n| i.node == n)
            })
            .cloned()
    }

    fn find_bridge(
        &self,
        name: &str,
        mac: Option<MacAddress>,
        node: Option<NodeId>,
    ) -> Option<Interface> {
        self.state
            .interfaces
            .values()
            .find(|i| {
                i.kind == InterfaceKind::Bridge
                    && i.name == name
                    && mac.map_or(true, |m| i.mac_address == Some(m))
                    && node.map_or(true, |n| i.node == n)
            })
            .cloned()
    }

    fn count_interfaces_on_vlan(&self, vlan: VlanId) -> usize {
        self.state
            .interfaces
            .values()
            .filter(|i| i.vlan == Some(vlan))
            .count()
    }

    fn create_interface(&mut self, new: NewInterface) -> StoreResult<Interface> {
        self.check_interface_refs(None, new.node, &new.name, new.kind, &new.parents, new.vlan)?;
        let interface = Interface {
            id: InterfaceId(self.state.allocate_id()),
            node: new.node,
            name: new.name,
            kind: new.kind,
            mac_address: new.mac_address,
            enabled: new.enabled,
            parents: new.parents,
            vlan: new.vlan,
            acquired: new.acquired,
            discovery: Default::default(),
            port: None,
        };
        self.state.interfaces.insert(interface.id, interface.clone());
        self.record_mutation("create interface");
        Ok(interface)
    }

    fn update_interface(&mut self, interface: &Interface) -> StoreResult<bool> {
        let current = self
            .state
            .interfaces
            .get(&interface.id)
            .ok_or_else(|| StoreError::not_found("interface", interface.id))?;
        if current == interface {
            return Ok(false);
        }
        self.check_interface_refs(
            Some(interface.id),
            interface.node,
            &interface.name,
            interface.kind,
            &interface.parents,
            interface.vlan,
        )?;
        self.state.interfaces.insert(interface.id, interface.clone());
        self.record_mutation("update interface");
        Ok(true)
    }

    fn delete_interface(&mut self, id: InterfaceId) -> StoreResult<()> {
        if !self.state.interfaces.contains_key(&id) {
            return Err(StoreError::not_found("interface", id));
        }
        if let Some(node) = self
            .state
            .nodes
            .values()
            .find(|n| n.boot_interface == Some(id))
        {
            return Err(StoreError::in_use(
                "interface",
                id,
                format!("boot interface of {}", node.id),
            ));
        }
        self.state.interfaces.remove(&id);
        for interface in self.state.interfaces.values_mut() {
            interface.parents.retain(|p| *p != id);
        }
        for record in self.state.addresses.values_mut() {
            record.interfaces.remove(&id);
        }
        self.record_mutation("delete interface");
        Ok(())
    }

    fn fabric(&self, id: FabricId) -> StoreResult<Fabric> {
        self.state
            .fabrics
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("fabric", id))
    }

    fn default_fabric(&self) -> StoreResult<Fabric> {
        self.state
            .fabrics
            .values()
            .next()
            .cloned()
            .ok_or_else(|| StoreError::not_found("fabric", "default"))
    }

    fn create_fabric(&mut self) -> StoreResult<Fabric> {
        Ok(self.insert_fabric())
    }

    fn delete_fabric(&mut self, id: FabricId) -> StoreResult<()> {
        if !self.state.fabrics.contains_key(&id) {
            return Err(StoreError::not_found("fabric", id));
        }
        if self.default_fabric()?.id == id {
            return Err(StoreError::in_use("fabric", id, "the default fabric"));
        }
        let vlans: Vec<VlanId> = self
            .state
            .vlans
            .values()
            .filter(|v| v.fabric == id)
            .map(|v| v.id)
            .collect();
        for vlan in &vlans {
            if self.count_interfaces_on_vlan(*vlan) > 0 {
                return Err(StoreError::in_use(
                    "fabric",
                    id,
                    format!("{vlan} has interfaces"),
                ));
            }
            if self.state.subnets.values().any(|s| s.vlan == *vlan) {
                return Err(StoreError::in_use(
                    "fabric",
                    id,
                    format!("{vlan} has subnets"),
                ));
            }
        }
        for vlan in vlans {
            self.state.vlans.remove(&vlan);
        }
        self.state.fabrics.remove(&id);
        self.record_mutation("delete fabric");
        Ok(())
    }

    fn vlan(&self, id: VlanId) -> StoreResult<Vlan> {
        self.state
            .vlans
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("vlan", id))
    }

    fn find_vlan(&self, fabric: FabricId, vid: VlanTag) -> Option<Vlan> {
        self.state
            .vlans
            .values()
            .find(|v| v.fabric == fabric && v.vid == vid)
            .cloned()
    }

    fn create_vlan(&mut self, fabric: FabricId, vid: VlanTag) -> StoreResult<Vlan> {
        if !self.state.fabrics.contains_key(&fabric) {
            return Err(StoreError::not_found("fabric", fabric));
        }
        if self.find_vlan(fabric, vid).is_some() {
            return Err(StoreError::conflict(
                "vlan",
                format!("{fabric} already has vid {vid}"),
            ));
        }
        let vlan = Vlan {
            id: VlanId(self.state.allocate_id()),
            fabric,
            vid,
        };
        self.state.vlans.insert(vlan.id, vlan.clone());
        self.record_mutation("create vlan");
        Ok(vlan)
    }

    fn subnet(&self, id: SubnetId) -> StoreResult<Subnet> {
        self.state
            .subnets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("subnet", id))
    }

    fn find_subnet_by_cidr(&self, cidr: &IpPrefix) -> Option<Subnet> {
        self.state
            .subnets
            .values()
            .find(|s| s.cidr == *cidr)
            .cloned()
    }

    fn create_subnet(&mut self, new: NewSubnet) -> StoreResult<Subnet> {
        self.check_subnet_refs(None, &new.cidr, new.vlan)?;
        let subnet = Subnet {
            id: SubnetId(self.state.allocate_id()),
            name: new.name,
            cidr: new.cidr,
            gateway: new.gateway,
            vlan: new.vlan,
        };
        self.state.subnets.insert(subnet.id, subnet.clone());
        self.record_mutation("create subnet");
        Ok(subnet)
    }

    fn update_subnet(&mut self, subnet: &Subnet) -> StoreResult<bool> {
        let current = self
            .state
            .subnets
            .get(&subnet.id)
            .ok_or_else(|| StoreError::not_found("subnet", subnet.id))?;
        if current == subnet {
            return Ok(false);
        }
        self.check_subnet_refs(Some(subnet.id), &subnet.cidr, subnet.vlan)?;
        self.state.subnets.insert(subnet.id, subnet.clone());
        self.record_mutation("update subnet");
        Ok(true)
    }

    fn address(&self, id: AddressId) -> StoreResult<IpAddressRecord> {
        self.state
            .addresses
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("address", id))
    }

    fn find_address_by_ip(&self, ip: &IpAddr) -> Option<IpAddressRecord> {
        self.state
            .addresses
            .values()
            .find(|a| a.ip.as_ref() == Some(ip))
            .cloned()
    }

    fn addresses_on_interface(&self, interface: InterfaceId) -> Vec<IpAddressRecord> {
        self.state
            .addresses
            .values()
            .filter(|a| a.interfaces.contains(&interface))
            .cloned()
            .collect()
    }

    fn create_address(&mut self, new: NewAddress) -> StoreResult<IpAddressRecord> {
        self.check_address_refs(None, new.ip, new.subnet)?;
        let record = IpAddressRecord {
            id: AddressId(self.state.allocate_id()),
            ip: new.ip,
            alloc: new.alloc,
            subnet: new.subnet,
            interfaces: Default::default(),
        };
        self.state.addresses.insert(record.id, record.clone());
        self.record_mutation("create address");
        Ok(record)
    }

    fn update_address(&mut self, record: &IpAddressRecord) -> StoreResult<bool> {
        let current = self
            .state
            .addresses
            .get(&record.id)
            .ok_or_else(|| StoreError::not_found("address", record.id))?;
        if current.ip == record.ip && current.alloc == record.alloc && current.subnet == record.subnet
        {
            return Ok(false);
        }
        self.check_address_refs(Some(record.id), record.ip, record.subnet)?;
        if let Some(current) = self.state.addresses.get_mut(&record.id) {
            current.ip = record.ip;
            current.alloc = record.alloc;
            current.subnet = record.subnet;
        }
        self.record_mutation("update address");
        Ok(true)
    }

    fn attach_address(&mut self, address: AddressId, interface: InterfaceId) -> StoreResult<bool> {
        if !self.state.interfaces.contains_key(&interface) {
            return Err(StoreError::not_found("interface", interface));
        }
        let record = self
            .state
            .addresses
            .get_mut(&address)
            .ok_or_else(|| StoreError::not_found("address", address))?;
        if !record.interfaces.insert(interface) {
            return Ok(false);
        }
        self.record_mutation("attach address");
        Ok(true)
    }

    fn detach_address(&mut self, address: AddressId, interface: InterfaceId) -> StoreResult<bool> {
        let record = self
            .state
            .addresses
            .get_mut(&address)
            .ok_or_else(|| StoreError::not_found("address", address))?;
        if !record.interfaces.remove(&interface) {
            return Ok(false);
        }
        self.record_mutation("detach address");
        Ok(true)
    }

    fn delete_address(&mut self, id: AddressId) -> StoreResult<()> {
        if self.state.addresses.remove(&id).is_none() {
            return Err(StoreError::not_found("address", id));
        }
        self.record_mutation("delete address");
        Ok(())
    }

    fn mutation_count(&self) -> u64 {
        self.mutations
    }
}
