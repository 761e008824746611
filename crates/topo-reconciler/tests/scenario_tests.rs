//! End-to-end reconciliation scenarios
//!
//! Tests full snapshot workflows against an in-memory graph:
//! - First contact of a commissioning node
//! - Links disappearing between runs
//! - Bonds and VLAN interfaces over reconciled parents
//! - Idempotence, ordering and deletion order

use pretty_assertions::assert_eq;
use topo_reconciler::{InconsistencyKind, ReconcileReport, Reconciler, Snapshot};
use topo_store::{AllocClass, MemoryStore, NodeId, NodeStatus, SharedStore, TopologyStore};
use topo_test::{GraphVerifier, HintSpec, InterfaceSpec, SnapshotBuilder, StoreFixture};

/// Test fixture: a shared graph and a reconciler with default settings
struct TestSetup {
    shared: SharedStore,
    reconciler: Reconciler,
}

impl TestSetup {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        Self {
            shared: SharedStore::new(store),
            reconciler: Reconciler::default(),
        }
    }

    fn run(
        &self,
        hostname: &str,
        status: NodeStatus,
        builder: &SnapshotBuilder,
    ) -> ReconcileReport {
        let snapshot = Snapshot::from_json(&builder.to_json()).expect("snapshot should decode");
        self.reconciler
            .reconcile_host(&self.shared, hostname, status, &snapshot)
            .expect("reconciliation should succeed")
    }

    fn graph(&self) -> MemoryStore {
        self.shared.snapshot()
    }

    fn node_id(&self, hostname: &str) -> NodeId {
        self.graph()
            .find_node_by_hostname(hostname)
            .expect("node should exist")
            .id
    }
}

/// Seeds another node whose interface already occupies the default VLAN.
fn store_with_busy_default_vlan() -> MemoryStore {
    let mut fixture = StoreFixture::new();
    let node = fixture.node("node0", NodeStatus::Deployed).unwrap();
    let default_vlan = fixture.default_fabric().unwrap().default_vlan;
    fixture
        .physical(node, "eth0", "52:54:00:00:00:f0".parse().unwrap(), Some(default_vlan))
        .unwrap();
    fixture.into_store()
}

fn eth0_with_address() -> SnapshotBuilder {
    SnapshotBuilder::new().interface(
        "eth0",
        InterfaceSpec::physical("52:54:00:00:00:01")
            .with_gateway_address("10.0.0.5", 24, "10.0.0.1"),
    )
}

#[test]
fn test_commissioning_node_first_contact() {
    let setup = TestSetup::with_store(store_with_busy_default_vlan());
    let report = setup.run("node1", NodeStatus::Commissioning, &eth0_with_address());
    assert_eq!(report.processed, vec!["eth0"]);

    let graph = setup.graph();
    let node = setup.node_id("node1");
    let verifier = GraphVerifier::new(&graph, node);
    verifier.assert_gateway("10.0.0.0/24", Some("10.0.0.1")).unwrap();
    verifier.assert_alloc("10.0.0.5", AllocClass::Discovered).unwrap();
    verifier.assert_attached("eth0", &["10.0.0.5"]).unwrap();

    let eth0 = verifier.interface("eth0").unwrap();
    let vlan = graph.vlan(eth0.vlan.unwrap()).unwrap();
    assert_ne!(vlan.fabric, graph.default_fabric().unwrap().id);
    let subnet = graph
        .find_subnet_by_cidr(&"10.0.0.0/24".parse().unwrap())
        .unwrap();
    assert_eq!(subnet.vlan, vlan.id);
    assert_eq!(subnet.name, "10.0.0.0/24");
}

#[test]
fn test_removed_link_leaves_subnet_and_fabric() {
    let setup = TestSetup::with_store(store_with_busy_default_vlan());
    setup.run("node1", NodeStatus::Commissioning, &eth0_with_address());
    let before = setup.graph();
    let node = setup.node_id("node1");
    let eth0 = GraphVerifier::new(&before, node).interface("eth0").unwrap();
    let fabric = before.vlan(eth0.vlan.unwrap()).unwrap().fabric;

    let without_link =
        SnapshotBuilder::new().interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"));
    setup.run("node1", NodeStatus::Commissioning, &without_link);

    let after = setup.graph();
    let verifier = GraphVerifier::new(&after, node);
    verifier.assert_attached("eth0", &[]).unwrap();
    verifier.assert_vlan("eth0", eth0.vlan.unwrap()).unwrap();
    verifier.assert_gateway("10.0.0.0/24", Some("10.0.0.1")).unwrap();
    assert!(after.fabric(fabric).is_ok());
}

#[test]
fn test_bond_inherits_parent_vlan() {
    let mut fixture = StoreFixture::new();
    let node = fixture.node("node1", NodeStatus::Deployed).unwrap();
    let v1 = fixture.fabric().unwrap().default_vlan;
    fixture
        .physical(node, "eth0", "52:54:00:00:00:01".parse().unwrap(), Some(v1))
        .unwrap();
    fixture
        .physical(node, "eth1", "52:54:00:00:00:02".parse().unwrap(), Some(v1))
        .unwrap();
    let setup = TestSetup::with_store(fixture.into_store());

    let builder = SnapshotBuilder::new()
        .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"))
        .interface("eth1", InterfaceSpec::physical("52:54:00:00:00:02"))
        .interface("bond0", InterfaceSpec::bond("52:54:00:00:00:01", &["eth0", "eth1"]));
    let report = setup.run("node1", NodeStatus::Deployed, &builder);
    assert_eq!(report.processed, vec!["eth0", "eth1", "bond0"]);

    let graph = setup.graph();
    let verifier = GraphVerifier::new(&graph, node);
    verifier.assert_vlan("bond0", v1).unwrap();
    verifier.assert_vlan("eth0", v1).unwrap();
    verifier.assert_vlan("eth1", v1).unwrap();
    assert_eq!(verifier.parent_names("bond0").unwrap(), vec!["eth0", "eth1"]);
}

#[test]
fn test_vlan_interface_follows_link_subnet() {
    let mut fixture = StoreFixture::new();
    let node = fixture.node("node1", NodeStatus::Deployed).unwrap();
    let default = fixture.default_fabric().unwrap();
    fixture
        .physical(
            node,
            "eth0",
            "52:54:00:00:00:01".parse().unwrap(),
            Some(default.default_vlan),
        )
        .unwrap();
    let vid20 = fixture.vlan(default.id, "20".parse().unwrap()).unwrap();
    fixture
        .subnet("10.20.0.0/24".parse().unwrap(), None, vid20)
        .unwrap();
    let setup = TestSetup::with_store(fixture.into_store());

    let builder = SnapshotBuilder::new()
        .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"))
        .interface(
            "eth0.10",
            InterfaceSpec::vlan("52:54:00:00:00:01", 10, "eth0").with_address("10.20.0.7", 24),
        );
    let report = setup.run("node1", NodeStatus::Deployed, &builder);

    let kinds: Vec<InconsistencyKind> = report.inconsistencies.iter().map(|i| i.kind).collect();
    assert_eq!(kinds, vec![InconsistencyKind::VidMismatch]);
    assert_eq!(report.inconsistencies[0].interface, "eth0.10");

    let graph = setup.graph();
    let verifier = GraphVerifier::new(&graph, node);
    verifier.assert_vlan("eth0.10", vid20).unwrap();
    verifier.assert_attached("eth0.10", &["10.20.0.7"]).unwrap();
    assert_eq!(verifier.parent_names("eth0.10").unwrap(), vec!["eth0"]);
}

fn full_host() -> SnapshotBuilder {
    SnapshotBuilder::new()
        .interface(
            "eth0",
            InterfaceSpec::physical("52:54:00:00:00:01")
                .with_gateway_address("10.0.0.5", 24, "10.0.0.1"),
        )
        .interface(
            "eth1",
            InterfaceSpec::physical("52:54:00:00:00:02").with_address("10.0.1.9", 24),
        )
        .interface("eth2", InterfaceSpec::physical("52:54:00:00:00:03"))
        .interface("eth3", InterfaceSpec::physical("52:54:00:00:00:04").down())
        .interface("bond0", InterfaceSpec::bond("52:54:00:00:00:03", &["eth2", "eth3"]))
        .interface("br0", InterfaceSpec::bridge("52:54:00:00:00:03", &["bond0"]))
        .interface("eth0.10", InterfaceSpec::vlan("52:54:00:00:00:01", 10, "eth0"))
        .interface("lo", InterfaceSpec::other("loopback"))
        .card("Intel Corporation", "I350", &[("eth0", "52:54:00:00:00:01", true)])
        .hint(HintSpec::new("same_local_fabric_as", "eth2").related_mac("52:54:00:00:00:01"))
        .monitored("eth0")
        .extra_link("eth1", "10.0.1.9/24", "dhcp", None)
}

#[test]
fn test_second_run_is_noop() {
    let setup = TestSetup::new();
    let first = setup.run("node1", NodeStatus::Commissioning, &full_host());
    assert!(!first.is_noop());
    let state = setup.graph().into_state();

    let second = setup.run("node1", NodeStatus::Commissioning, &full_host());
    assert_eq!(second.mutations, 0);
    assert!(second.deleted.is_empty());
    assert_eq!(setup.graph().into_state(), state);
}

#[test]
fn test_processing_order_is_deterministic() {
    let first = TestSetup::new();
    let second = TestSetup::new();
    let report = first.run("node1", NodeStatus::Commissioning, &full_host());
    second.run("node1", NodeStatus::Commissioning, &full_host());

    assert_eq!(
        report.processed,
        vec!["eth0", "eth1", "eth2", "eth3", "bond0", "eth0.10", "br0"]
    );
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "lo");
    assert_eq!(first.graph().into_state(), second.graph().into_state());
}

#[test]
fn test_full_host_topology() {
    let setup = TestSetup::new();
    setup.run("node1", NodeStatus::Commissioning, &full_host());
    let graph = setup.graph();
    let node = setup.node_id("node1");
    let verifier = GraphVerifier::new(&graph, node);

    let eth0 = verifier.interface("eth0").unwrap();
    let eth0_vlan = eth0.vlan.unwrap();
    // The own-node hint places eth2 with eth0; bond0 and br0 follow eth2.
    verifier.assert_vlan("eth2", eth0_vlan).unwrap();
    verifier.assert_vlan("bond0", eth0_vlan).unwrap();
    verifier.assert_vlan("br0", eth0_vlan).unwrap();
    assert_eq!(verifier.parent_names("br0").unwrap(), vec!["bond0"]);

    assert!(eth0.discovery.neighbour);
    assert_eq!(eth0.port.unwrap().product.as_deref(), Some("I350"));
    assert!(!verifier.interface("eth3").unwrap().enabled);

    verifier.assert_alloc("10.0.1.9", AllocClass::Discovered).unwrap();
    let eth1 = verifier.interface("eth1").unwrap();
    let placeholders = graph
        .addresses_on_interface(eth1.id)
        .into_iter()
        .filter(|record| record.alloc == AllocClass::DhcpPending)
        .count();
    assert_eq!(placeholders, 1);
}

#[test]
fn test_stale_interfaces_deleted_children_first() {
    let setup = TestSetup::new();
    let builder = SnapshotBuilder::new()
        .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"))
        .interface("eth1", InterfaceSpec::physical("52:54:00:00:00:02"))
        .interface("bond0", InterfaceSpec::bond("52:54:00:00:00:01", &["eth0", "eth1"]))
        .interface("bond0.10", InterfaceSpec::vlan("52:54:00:00:00:01", 10, "bond0"));
    setup.run("node1", NodeStatus::Deployed, &builder);

    let report = setup.run("node1", NodeStatus::Deployed, &SnapshotBuilder::new());
    assert_eq!(report.deleted, vec!["bond0.10", "bond0", "eth1", "eth0"]);

    let graph = setup.graph();
    let verifier = GraphVerifier::new(&graph, setup.node_id("node1"));
    assert!(verifier.interface_names().is_empty());
}

#[test]
fn test_vlan_inference_evidence_order() {
    let mut fixture = StoreFixture::new();
    let other = fixture.node("node2", NodeStatus::Deployed).unwrap();
    let hinted = fixture.fabric().unwrap().default_vlan;
    let linked = fixture.fabric().unwrap().default_vlan;
    fixture
        .physical(other, "eth9", "52:54:00:00:00:aa".parse().unwrap(), Some(hinted))
        .unwrap();
    fixture
        .subnet("10.5.0.0/24".parse().unwrap(), None, linked)
        .unwrap();
    let default_vlan = fixture.default_fabric().unwrap().default_vlan;
    let setup = TestSetup::with_store(fixture.into_store());

    let builder = SnapshotBuilder::new()
        .interface("eth0", InterfaceSpec::physical("52:54:00:00:00:01"))
        .interface(
            "eth1",
            InterfaceSpec::physical("52:54:00:00:00:02").with_address("10.5.0.8", 24),
        )
        .interface("eth2", InterfaceSpec::physical("52:54:00:00:00:03"))
        .hint(HintSpec::new("routable_to", "eth0").related_mac("52:54:00:00:00:aa"))
        .hint(
            HintSpec::new("routable_to", "eth2")
                .related_mac("52:54:00:00:00:aa")
                .vid(30),
        );
    setup.run("node1", NodeStatus::Commissioning, &builder);

    let graph = setup.graph();
    let verifier = GraphVerifier::new(&graph, setup.node_id("node1"));
    verifier.assert_vlan("eth0", hinted).unwrap();
    verifier.assert_vlan("eth1", linked).unwrap();
    verifier.assert_vlan("eth2", default_vlan).unwrap();
}
