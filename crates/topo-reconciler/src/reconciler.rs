//! Per-snapshot orchestration.
//!
//! [`Reconciler::reconcile`] resolves the interface order, reconciles every
//! entry in that order, then deletes the interfaces the snapshot no longer
//! reports. The per-step logic lives in sibling modules as further `impl`
//! blocks on [`Session`].

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::report::ReconcileReport;
use crate::resolver::resolve_order;
use crate::snapshot::{Card, Port, Snapshot};
use std::collections::BTreeMap;
use topo_store::{
    DiscoveryState, FabricId, InterfaceId, InterfaceKind, Node, NodeId, NodeStatus, PortDetails,
    SharedStore, StoreError, TopologyStore,
};
use tracing::{debug, info, instrument};

/// Reconciles host snapshots against a topology store.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconciles `snapshot` for `node` inside the caller's unit of work.
    ///
    /// On error the caller must discard the unit of work; partial changes
    /// are left in `store`.
    #[instrument(skip(self, store, snapshot), fields(interfaces = snapshot.networks.len()))]
    pub fn reconcile<S>(
        &self,
        store: &mut S,
        node: NodeId,
        snapshot: &Snapshot,
    ) -> Result<ReconcileReport>
    where
        S: TopologyStore + ?Sized,
    {
        let start = store.mutation_count();
        let node = store.node(node)?;
        let order =
            resolve_order(&snapshot.dependencies()).map_err(|e| ReconcileError::cycle(e.members))?;
        let initial: Vec<InterfaceId> = store
            .interfaces_on_node(node.id)
            .into_iter()
            .map(|iface| iface.id)
            .collect();
        let address_extra = snapshot.address_extra();

        let mut session = Session::new(&mut *store, node, &self.config);
        for name in &order {
            let Some(entry) = snapshot.networks.get(name) else {
                continue;
            };
            if let Some(id) = session.reconcile_entry(name, entry, snapshot, &address_extra)? {
                session.update_details(id, name, snapshot)?;
                session.mark_reconciled(name, id);
            }
        }
        session.delete_stale(&initial)?;
        session.release_fresh_fabrics()?;

        let mut report = session.finish();
        report.mutations = store.mutation_count() - start;
        info!(
            hostname = %report.hostname,
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            deleted = report.deleted.len(),
            inconsistencies = report.inconsistencies.len(),
            mutations = report.mutations,
            "Reconciled snapshot"
        );
        Ok(report)
    }

    /// Reconciles `snapshot` in its own transaction on `shared`.
    ///
    /// Nothing is committed unless the whole snapshot succeeds.
    pub fn reconcile_shared(
        &self,
        shared: &SharedStore,
        node: NodeId,
        snapshot: &Snapshot,
    ) -> Result<ReconcileReport> {
        shared.transaction(|store| self.reconcile(store, node, snapshot))
    }

    /// Like [`Reconciler::reconcile_shared`], creating the node with
    /// `status` first when no node is named `hostname`.
    pub fn reconcile_host(
        &self,
        shared: &SharedStore,
        hostname: &str,
        status: NodeStatus,
        snapshot: &Snapshot,
    ) -> Result<ReconcileReport> {
        shared.transaction(|store| {
            let node = match store.find_node_by_hostname(hostname) {
                Some(node) => node,
                None => {
                    info!(hostname, status = status.as_str(), "Registering node");
                    store.create_node(hostname, status)?
                }
            };
            self.reconcile(store, node.id, snapshot)
        })
    }
}

/// State of one reconciliation run.
pub(crate) struct Session<'a, S: TopologyStore + ?Sized> {
    pub(crate) store: &'a mut S,
    pub(crate) node: Node,
    pub(crate) config: &'a ReconcilerConfig,
    pub(crate) report: ReconcileReport,
    /// Interfaces reconciled so far, by snapshot name.
    reconciled: BTreeMap<String, InterfaceId>,
    /// Fabrics allocated by fallback inference during this run.
    pub(crate) fresh_fabrics: Vec<FabricId>,
}

impl<'a, S: TopologyStore + ?Sized> Session<'a, S> {
    pub(crate) fn new(store: &'a mut S, node: Node, config: &'a ReconcilerConfig) -> Self {
        let report = ReconcileReport::new(node.hostname.clone());
        Self {
            store,
            node,
            config,
            report,
            reconciled: BTreeMap::new(),
            fresh_fabrics: Vec::new(),
        }
    }

    pub(crate) fn reconciled_id(&self, name: &str) -> Option<InterfaceId> {
        self.reconciled.get(name).copied()
    }

    pub(crate) fn is_reconciled(&self, id: InterfaceId) -> bool {
        self.reconciled.values().any(|reconciled| *reconciled == id)
    }

    pub(crate) fn mark_reconciled(&mut self, name: &str, id: InterfaceId) {
        self.reconciled.insert(name.to_string(), id);
        self.report.processed.push(name.to_string());
    }

    /// Drops a purged interface from the reconciled set.
    pub(crate) fn forget(&mut self, id: InterfaceId) {
        self.reconciled.retain(|_, reconciled| *reconciled != id);
    }

    /// Refreshes discovery state and, for physical interfaces, the port
    /// inventory.
    fn update_details(&mut self, id: InterfaceId, name: &str, snapshot: &Snapshot) -> Result<()> {
        let mut iface = self.store.interface(id)?;
        let passive = self.config.discovery.passive;
        iface.discovery = DiscoveryState {
            neighbour: passive && snapshot.is_monitored(name),
            mdns: passive,
        };
        if iface.kind == InterfaceKind::Physical {
            if let Some((card, port)) = snapshot.card_port(name) {
                iface.port = Some(port_details(card, port));
            }
        }
        self.store.update_interface(&iface)?;
        Ok(())
    }

    /// Deletes fabrics allocated during this run that nothing uses any
    /// more, which happens when address evidence moved their interface.
    pub(crate) fn release_fresh_fabrics(&mut self) -> Result<()> {
        for fabric in std::mem::take(&mut self.fresh_fabrics) {
            match self.store.delete_fabric(fabric) {
                Ok(()) => info!(%fabric, "Deleted unused fabric"),
                Err(StoreError::InUse { .. }) => {
                    debug!(%fabric, "Keeping fabric allocated this run");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> ReconcileReport {
        self.report
    }
}

fn port_details(card: &Card, port: &Port) -> PortDetails {
    PortDetails {
        vendor: card.vendor.clone(),
        product: card.product.clone(),
        firmware_version: card.firmware_version.clone(),
        numa_node: card.numa_node,
        sriov_max_vf: card.sriov.as_ref().map(|sriov| sriov.maximum_vfs),
        link_connected: port.link_detected,
        link_speed: port.link_speed,
        interface_speed: port.max_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{NetworkEntry, Resources, Sriov};
    use pretty_assertions::assert_eq;
    use topo_store::MemoryStore;

    fn physical_entry(mac: &str) -> NetworkEntry {
        NetworkEntry {
            kind: "broadcast".to_string(),
            hwaddr: Some(mac.to_string()),
            state: "up".to_string(),
            ..Default::default()
        }
    }

    fn snapshot(entries: &[(&str, NetworkEntry)]) -> Snapshot {
        Snapshot {
            networks: entries
                .iter()
                .map(|(name, entry)| (name.to_string(), entry.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unchanged_snapshot_is_noop() {
        let mut store = MemoryStore::new();
        let node = store.create_node("node1", NodeStatus::Ready).unwrap();
        let snapshot = snapshot(&[("eth0", physical_entry("52:54:00:00:00:01"))]);
        let reconciler = Reconciler::default();

        let first = reconciler.reconcile(&mut store, node.id, &snapshot).unwrap();
        assert_eq!(first.processed, vec!["eth0"]);
        assert!(!first.is_noop());

        let second = reconciler.reconcile(&mut store, node.id, &snapshot).unwrap();
        assert_eq!(second.mutations, 0);
    }

    #[test]
    fn test_discovery_state_follows_config() {
        let mut store = MemoryStore::new();
        let node = store.create_node("node1", NodeStatus::Ready).unwrap();
        let mut snapshot = snapshot(&[
            ("eth0", physical_entry("52:54:00:00:00:01")),
            ("eth1", physical_entry("52:54:00:00:00:02")),
        ]);
        snapshot.network_extra = Some(crate::snapshot::NetworkExtra {
            monitored_interfaces: vec!["eth0".to_string()],
            ..Default::default()
        });

        Reconciler::default()
            .reconcile(&mut store, node.id, &snapshot)
            .unwrap();

        let eth0 = store.find_interface_by_name(node.id, "eth0").unwrap();
        let eth1 = store.find_interface_by_name(node.id, "eth1").unwrap();
        assert_eq!(eth0.discovery, DiscoveryState { neighbour: true, mdns: true });
        assert_eq!(eth1.discovery, DiscoveryState { neighbour: false, mdns: true });

        let mut config = ReconcilerConfig::default();
        config.discovery.passive = false;
        Reconciler::new(config)
            .reconcile(&mut store, node.id, &snapshot)
            .unwrap();
        let eth0 = store.find_interface_by_name(node.id, "eth0").unwrap();
        assert_eq!(eth0.discovery, DiscoveryState::default());
    }

    #[test]
    fn test_port_details_recorded() {
        let mut store = MemoryStore::new();
        let node = store.create_node("node1", NodeStatus::Ready).unwrap();
        let mut snapshot = snapshot(&[("eth0", physical_entry("52:54:00:00:00:01"))]);
        snapshot.resources = Resources::default();
        snapshot.resources.network.cards.push(Card {
            vendor: Some("Intel Corporation".to_string()),
            product: Some("Ethernet Controller X710".to_string()),
            firmware_version: Some("6.01".to_string()),
            numa_node: Some(1),
            sriov: Some(Sriov { maximum_vfs: 64 }),
            ports: vec![Port {
                id: "eth0".to_string(),
                address: "52:54:00:00:00:01".to_string(),
                link_detected: true,
                link_speed: Some(10000),
                max_speed: Some(40000),
            }],
        });

        Reconciler::default()
            .reconcile(&mut store, node.id, &snapshot)
            .unwrap();

        let eth0 = store.find_interface_by_name(node.id, "eth0").unwrap();
        let port = eth0.port.unwrap();
        assert_eq!(port.vendor.as_deref(), Some("Intel Corporation"));
        assert_eq!(port.sriov_max_vf, Some(64));
        assert_eq!(port.numa_node, Some(1));
        assert!(port.link_connected);
        assert_eq!(port.link_speed, Some(10000));
        assert_eq!(port.interface_speed, Some(40000));
    }

    #[test]
    fn test_fallback_fabric_released_when_parents_move() {
        let mut store = MemoryStore::new();
        let node = store.create_node("node1", NodeStatus::Deployed).unwrap();
        let target = store.create_fabric().unwrap();
        store
            .create_subnet(topo_store::NewSubnet {
                name: "10.9.0.0/24".to_string(),
                cidr: "10.9.0.0/24".parse().unwrap(),
                gateway: None,
                vlan: target.default_vlan,
            })
            .unwrap();

        let mut bond0 = physical_entry("52:54:00:00:00:01");
        bond0.bond = Some(crate::snapshot::BondEntry {
            lower_devices: vec!["eth0".to_string(), "eth1".to_string()],
        });
        bond0.addresses.push(crate::snapshot::AddressEntry {
            address: "10.9.0.4".to_string(),
            netmask: crate::snapshot::Netmask::Length(24),
            scope: "global".to_string(),
            gateway: None,
            mode: None,
        });
        let snapshot = snapshot(&[
            ("eth0", physical_entry("52:54:00:00:00:01")),
            ("eth1", physical_entry("52:54:00:00:00:02")),
            ("bond0", bond0),
        ]);

        Reconciler::default()
            .reconcile(&mut store, node.id, &snapshot)
            .unwrap();

        let eth1 = store.find_interface_by_name(node.id, "eth1").unwrap();
        assert_eq!(eth1.vlan, Some(target.default_vlan));
        assert_eq!(store.state().fabrics.len(), 2);
    }

    #[test]
    fn test_reconcile_host_creates_node_once() {
        let shared = SharedStore::default();
        let snapshot = snapshot(&[("eth0", physical_entry("52:54:00:00:00:01"))]);
        let reconciler = Reconciler::default();

        reconciler
            .reconcile_host(&shared, "node1", NodeStatus::Deployed, &snapshot)
            .unwrap();
        let report = reconciler
            .reconcile_host(&shared, "node1", NodeStatus::New, &snapshot)
            .unwrap();

        assert_eq!(report.mutations, 0);
        let store = shared.snapshot();
        let node = store.find_node_by_hostname("node1").unwrap();
        assert_eq!(node.status, NodeStatus::Deployed);
        assert_eq!(store.state().nodes.len(), 1);
    }
}
