//! Test fixtures for reconciliation scenarios
//!
//! [`SnapshotBuilder`] assembles host snapshots in their JSON wire form;
//! [`StoreFixture`] seeds a [`MemoryStore`] with the graph a scenario
//! starts from.

use serde_json::{json, Map, Value};
use std::net::IpAddr;
use topo_store::{
    AddressId, AllocClass, Fabric, FabricId, InterfaceId, InterfaceKind, MemoryStore, NewAddress,
    NewInterface, NewSubnet, NodeId, NodeStatus, StoreResult, SubnetId, TopologyStore, VlanId,
};
use topo_types::{IpPrefix, MacAddress, VlanTag};

/// One `networks` entry under construction
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    entry: Map<String, Value>,
}

impl InterfaceSpec {
    fn broadcast(hwaddr: &str) -> Self {
        let mut entry = Map::new();
        entry.insert("type".into(), json!("broadcast"));
        entry.insert("hwaddr".into(), json!(hwaddr));
        entry.insert("state".into(), json!("up"));
        entry.insert("addresses".into(), json!([]));
        Self { entry }
    }

    /// Physical NIC with the given hardware address
    pub fn physical(hwaddr: &str) -> Self {
        Self::broadcast(hwaddr)
    }

    /// Bond over `parents`
    pub fn bond(hwaddr: &str, parents: &[&str]) -> Self {
        Self::broadcast(hwaddr).with_section("bond", json!({ "lower_devices": parents }))
    }

    /// Bridge over `parents`
    pub fn bridge(hwaddr: &str, parents: &[&str]) -> Self {
        Self::broadcast(hwaddr).with_section("bridge", json!({ "upper_devices": parents }))
    }

    /// 802.1Q interface tagged `vid` on `parent`
    pub fn vlan(hwaddr: &str, vid: u16, parent: &str) -> Self {
        Self::broadcast(hwaddr)
            .with_section("vlan", json!({ "vid": vid, "lower_device": parent }))
    }

    /// Entry of a type the engine does not model, such as `loopback`
    pub fn other(kind: &str) -> Self {
        let mut spec = Self::broadcast("00:00:00:00:00:00");
        spec.entry.insert("type".into(), json!(kind));
        spec
    }

    fn with_section(mut self, key: &str, section: Value) -> Self {
        self.entry.insert(key.into(), section);
        self
    }

    /// Set the reported link state to down
    pub fn down(mut self) -> Self {
        self.entry.insert("state".into(), json!("down"));
        self
    }

    /// Add a global address with a prefix length
    pub fn with_address(self, address: &str, prefix_len: u8) -> Self {
        self.push_address(json!({
            "address": address,
            "netmask": prefix_len,
            "scope": "global",
        }))
    }

    /// Add a global address with a dotted or textual netmask
    pub fn with_netmask(self, address: &str, netmask: &str) -> Self {
        self.push_address(json!({
            "address": address,
            "netmask": netmask,
            "scope": "global",
        }))
    }

    /// Add a global address with its gateway
    pub fn with_gateway_address(self, address: &str, prefix_len: u8, gateway: &str) -> Self {
        self.push_address(json!({
            "address": address,
            "netmask": prefix_len,
            "scope": "global",
            "gateway": gateway,
        }))
    }

    /// Add a link-local address, which the engine ignores
    pub fn with_link_local(self, address: &str, prefix_len: u8) -> Self {
        self.push_address(json!({
            "address": address,
            "netmask": prefix_len,
            "scope": "link",
        }))
    }

    fn push_address(mut self, address: Value) -> Self {
        if let Some(Value::Array(addresses)) = self.entry.get_mut("addresses") {
            addresses.push(address);
        }
        self
    }

    /// The entry as JSON
    pub fn to_value(&self) -> Value {
        Value::Object(self.entry.clone())
    }
}

/// A discovery hint under construction
#[derive(Debug, Clone)]
pub struct HintSpec {
    hint: Map<String, Value>,
}

impl HintSpec {
    /// Hint of `kind` about `ifname`
    pub fn new(kind: &str, ifname: &str) -> Self {
        let mut hint = Map::new();
        hint.insert("hint".into(), json!(kind));
        hint.insert("ifname".into(), json!(ifname));
        Self { hint }
    }

    pub fn related_mac(mut self, mac: &str) -> Self {
        self.hint.insert("related_mac".into(), json!(mac));
        self
    }

    pub fn related_ifname(mut self, ifname: &str) -> Self {
        self.hint.insert("related_ifname".into(), json!(ifname));
        self
    }

    /// Mark the hint as seen on a tagged VLAN
    pub fn vid(mut self, vid: u16) -> Self {
        self.hint.insert("vid".into(), json!(vid));
        self
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.hint.clone())
    }
}

/// Builder for host snapshots
///
/// # Example
///
/// ```
/// use topo_test::{InterfaceSpec, SnapshotBuilder};
///
/// let json = SnapshotBuilder::new()
///     .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01").with_address("10.0.0.5", 24))
///     .monitored("eth0")
///     .to_json();
/// assert!(json.contains("\"monitored-interfaces\""));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    networks: Map<String, Value>,
    cards: Vec<Value>,
    hints: Vec<Value>,
    monitored: Vec<String>,
    extra_links: Map<String, Value>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a `networks` entry
    pub fn interface(mut self, name: &str, spec: InterfaceSpec) -> Self {
        self.networks.insert(name.to_string(), spec.to_value());
        self
    }

    /// Add a network card with one port per `(name, mac, link_detected)`
    pub fn card(mut self, vendor: &str, product: &str, ports: &[(&str, &str, bool)]) -> Self {
        let ports: Vec<Value> = ports
            .iter()
            .map(|(id, address, link_detected)| {
                json!({
                    "id": id,
                    "address": address,
                    "link_detected": link_detected,
                    "link_speed": 10000,
                    "max_speed": 25000,
                })
            })
            .collect();
        self.cards.push(json!({
            "vendor": vendor,
            "product": product,
            "firmware_version": "1.0",
            "numa_node": 0,
            "sriov": { "maximum_vfs": 8 },
            "ports": ports,
        }));
        self
    }

    pub fn hint(mut self, hint: HintSpec) -> Self {
        self.hints.push(hint.to_value());
        self
    }

    /// Mark `name` as monitored for neighbour discovery
    pub fn monitored(mut self, name: &str) -> Self {
        self.monitored.push(name.to_string());
        self
    }

    /// Add a `network-extra` link overlay for `ifname`
    pub fn extra_link(
        mut self,
        ifname: &str,
        address: &str,
        mode: &str,
        gateway: Option<&str>,
    ) -> Self {
        let mut link = Map::new();
        link.insert("address".into(), json!(address));
        link.insert("mode".into(), json!(mode));
        if let Some(gateway) = gateway {
            link.insert("gateway".into(), json!(gateway));
        }
        let entry = self
            .extra_links
            .entry(ifname.to_string())
            .or_insert_with(|| json!({ "links": [] }));
        if let Some(Value::Array(links)) = entry.get_mut("links") {
            links.push(Value::Object(link));
        }
        self
    }

    /// The snapshot as JSON
    pub fn build(&self) -> Value {
        let mut snapshot = json!({
            "networks": Value::Object(self.networks.clone()),
            "resources": { "network": { "cards": self.cards.clone() } },
        });
        let has_extra =
            !self.hints.is_empty() || !self.monitored.is_empty() || !self.extra_links.is_empty();
        if has_extra {
            snapshot["network-extra"] = json!({
                "hints": self.hints.clone(),
                "monitored-interfaces": self.monitored.clone(),
                "interfaces": Value::Object(self.extra_links.clone()),
            });
        }
        snapshot
    }

    pub fn to_json(&self) -> String {
        self.build().to_string()
    }
}

/// A [`MemoryStore`] seeded for a scenario
#[derive(Debug, Default)]
pub struct StoreFixture {
    pub store: MemoryStore,
}

impl StoreFixture {
    /// Empty graph with its default fabric
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
        }
    }

    pub fn node(&mut self, hostname: &str, status: NodeStatus) -> StoreResult<NodeId> {
        Ok(self.store.create_node(hostname, status)?.id)
    }

    pub fn default_fabric(&self) -> StoreResult<Fabric> {
        self.store.default_fabric()
    }

    pub fn fabric(&mut self) -> StoreResult<Fabric> {
        self.store.create_fabric()
    }

    /// Tagged VLAN in `fabric`
    pub fn vlan(&mut self, fabric: FabricId, vid: VlanTag) -> StoreResult<VlanId> {
        Ok(self.store.create_vlan(fabric, vid)?.id)
    }

    /// Subnet named after its CIDR
    pub fn subnet(
        &mut self,
        cidr: IpPrefix,
        gateway: Option<IpAddr>,
        vlan: VlanId,
    ) -> StoreResult<SubnetId> {
        let subnet = self.store.create_subnet(NewSubnet {
            name: cidr.to_string(),
            cidr,
            gateway,
            vlan,
        })?;
        Ok(subnet.id)
    }

    /// Enabled physical interface
    pub fn physical(
        &mut self,
        node: NodeId,
        name: &str,
        mac: MacAddress,
        vlan: Option<VlanId>,
    ) -> StoreResult<InterfaceId> {
        let iface = self.store.create_interface(NewInterface {
            node,
            name: name.to_string(),
            kind: InterfaceKind::Physical,
            mac_address: Some(mac),
            enabled: true,
            parents: Vec::new(),
            vlan,
            acquired: false,
        })?;
        Ok(iface.id)
    }

    /// Address record attached to `interface`
    pub fn address(
        &mut self,
        ip: IpAddr,
        alloc: AllocClass,
        subnet: Option<SubnetId>,
        interface: InterfaceId,
    ) -> StoreResult<AddressId> {
        let record = self.store.create_address(NewAddress {
            ip: Some(ip),
            alloc,
            subnet,
        })?;
        self.store.attach_address(record.id, interface)?;
        Ok(record.id)
    }

    /// Make `interface` the boot interface of `node`
    pub fn boot_interface(&mut self, node: NodeId, interface: InterfaceId) -> StoreResult<()> {
        let mut node = self.store.node(node)?;
        node.boot_interface = Some(interface);
        self.store.update_node(&node)?;
        Ok(())
    }

    pub fn into_store(self) -> MemoryStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_interface_spec_shapes() {
        let bond = InterfaceSpec::bond("52:54:00:00:00:b0", &["eth0", "eth1"]).to_value();
        assert_eq!(bond["type"], "broadcast");
        assert_eq!(bond["bond"]["lower_devices"], json!(["eth0", "eth1"]));

        let vlan = InterfaceSpec::vlan("52:54:00:00:00:01", 10, "eth0")
            .down()
            .to_value();
        assert_eq!(vlan["vlan"], json!({ "vid": 10, "lower_device": "eth0" }));
        assert_eq!(vlan["state"], "down");
    }

    #[test]
    fn test_addresses_accumulate() {
        let spec = InterfaceSpec::physical("52:54:00:00:00:01")
            .with_gateway_address("10.0.0.5", 24, "10.0.0.1")
            .with_netmask("192.168.1.9", "255.255.255.0")
            .with_link_local("fe80::1", 64)
            .to_value();
        let addresses = spec["addresses"].as_array().unwrap();
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0]["gateway"], "10.0.0.1");
        assert_eq!(addresses[1]["netmask"], "255.255.255.0");
        assert_eq!(addresses[2]["scope"], "link");
    }

    #[test]
    fn test_network_extra_only_when_used() {
        let plain = SnapshotBuilder::new()
            .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"))
            .build();
        assert!(plain.get("network-extra").is_none());

        let extra = SnapshotBuilder::new()
            .hint(HintSpec::new("routable_to", "eth0").related_mac("52:54:00:00:00:aa"))
            .extra_link("eth0", "10.0.0.5/24", "dhcp", None)
            .extra_link("eth0", "10.0.1.5/24", "static", Some("10.0.1.1"))
            .build();
        assert_eq!(extra["network-extra"]["hints"][0]["related_mac"], "52:54:00:00:00:aa");
        assert_eq!(
            extra["network-extra"]["interfaces"]["eth0"]["links"][1]["gateway"],
            "10.0.1.1"
        );
    }

    #[test]
    fn test_store_fixture_seeds_graph() {
        let mut fixture = StoreFixture::new();
        let node = fixture.node("node1", NodeStatus::Deployed).unwrap();
        let vlan = fixture.default_fabric().unwrap().default_vlan;
        let subnet = fixture
            .subnet("10.0.0.0/24".parse().unwrap(), None, vlan)
            .unwrap();
        let eth0 = fixture
            .physical(node, "eth0", "52:54:00:00:00:01".parse().unwrap(), Some(vlan))
            .unwrap();
        fixture
            .address("10.0.0.5".parse().unwrap(), AllocClass::Sticky, Some(subnet), eth0)
            .unwrap();
        fixture.boot_interface(node, eth0).unwrap();

        let store = fixture.into_store();
        assert_eq!(store.addresses_on_interface(eth0).len(), 1);
        assert_eq!(store.node(node).unwrap().boot_interface, Some(eth0));
    }
}
