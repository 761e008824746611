//! The unit-of-work interface the reconciliation engine runs against.

use crate::error::StoreResult;
use crate::model::{
    AddressId, Fabric, FabricId, Interface, InterfaceId, IpAddressRecord, NewAddress,
    NewInterface, NewSubnet, Node, NodeId, NodeStatus, Subnet, SubnetId, Vlan, VlanId,
};
use std::net::IpAddr;
use topo_types::{IpPrefix, MacAddress, VlanTag};

/// Transactional access to the persisted topology graph.
///
/// One value of an implementing type is one unit of work: reads observe
/// earlier writes made through the same value, and nothing is visible to
/// other callers until the owner commits it.
///
/// Lookups by identity return [`StoreError::NotFound`](crate::StoreError)
/// for missing records; `find_*` lookups return `None`. Every update
/// returns whether anything actually changed, and unchanged updates are
/// not counted by [`TopologyStore::mutation_count`].
pub trait TopologyStore {
    // ---- nodes ----

    fn node(&self, id: NodeId) -> StoreResult<Node>;

    fn find_node_by_hostname(&self, hostname: &str) -> Option<Node>;

    fn create_node(&mut self, hostname: &str, status: NodeStatus) -> StoreResult<Node>;

    fn update_node(&mut self, node: &Node) -> StoreResult<bool>;

    // ---- interfaces ----

    fn interface(&self, id: InterfaceId) -> StoreResult<Interface>;

    /// All interfaces of `node`, ordered by identity.
    fn interfaces_on_node(&self, node: NodeId) -> Vec<Interface>;

    fn find_interface_by_name(&self, node: NodeId, name: &str) -> Option<Interface>;

    /// Finds a physical interface by hardware address, optionally
    /// restricted to one node.
    fn find_physical_by_mac(&self, mac: MacAddress, node: Option<NodeId>) -> Option<Interface>;

    /// Finds a bridge by name and (when given) hardware address.
    fn find_bridge(
        &self,
        name: &str,
        mac: Option<MacAddress>,
        node: Option<NodeId>,
    ) -> Option<Interface>;

    /// Number of interfaces currently assigned to `vlan`.
    fn count_interfaces_on_vlan(&self, vlan: VlanId) -> usize;

    /// Creates an interface.
    ///
    /// Fails with `Conflict` on a duplicate name within the node and with
    /// `Invalid` when the parent count does not fit the kind.
    fn create_interface(&mut self, new: NewInterface) -> StoreResult<Interface>;

    fn update_interface(&mut self, interface: &Interface) -> StoreResult<bool>;

    /// Deletes an interface, detaching its addresses and dropping it from
    /// its children's parent lists.
    ///
    /// Fails with `InUse` while a node still designates it as boot
    /// interface.
    fn delete_interface(&mut self, id: InterfaceId) -> StoreResult<()>;

    // ---- fabrics and VLANs ----

    fn fabric(&self, id: FabricId) -> StoreResult<Fabric>;

    /// The oldest fabric, which always exists.
    fn default_fabric(&self) -> StoreResult<Fabric>;

    /// Creates a fabric together with its untagged default VLAN.
    fn create_fabric(&mut self) -> StoreResult<Fabric>;

    /// Deletes an unused fabric and its VLANs.
    fn delete_fabric(&mut self, id: FabricId) -> StoreResult<()>;

    fn vlan(&self, id: VlanId) -> StoreResult<Vlan>;

    fn find_vlan(&self, fabric: FabricId, vid: VlanTag) -> Option<Vlan>;

    fn create_vlan(&mut self, fabric: FabricId, vid: VlanTag) -> StoreResult<Vlan>;

    // ---- subnets ----

    fn subnet(&self, id: SubnetId) -> StoreResult<Subnet>;

    fn find_subnet_by_cidr(&self, cidr: &IpPrefix) -> Option<Subnet>;

    fn create_subnet(&mut self, new: NewSubnet) -> StoreResult<Subnet>;

    fn update_subnet(&mut self, subnet: &Subnet) -> StoreResult<bool>;

    // ---- IP addresses ----

    fn address(&self, id: AddressId) -> StoreResult<IpAddressRecord>;

    fn find_address_by_ip(&self, ip: &IpAddr) -> Option<IpAddressRecord>;

    /// Records attached to `interface`, ordered by identity.
    fn addresses_on_interface(&self, interface: InterfaceId) -> Vec<IpAddressRecord>;

    fn create_address(&mut self, new: NewAddress) -> StoreResult<IpAddressRecord>;

    /// Updates the IP, class and subnet of a record. Attachments are only
    /// changed through [`attach_address`](TopologyStore::attach_address)
    /// and [`detach_address`](TopologyStore::detach_address).
    fn update_address(&mut self, record: &IpAddressRecord) -> StoreResult<bool>;

    fn attach_address(&mut self, address: AddressId, interface: InterfaceId) -> StoreResult<bool>;

    fn detach_address(&mut self, address: AddressId, interface: InterfaceId) -> StoreResult<bool>;

    fn delete_address(&mut self, id: AddressId) -> StoreResult<()>;

    /// Number of persisted changes made so far.
    fn mutation_count(&self) -> u64;
}
