//! Removal of interfaces the snapshot no longer reports.

use crate::error::{ReconcileError, Result};
use crate::reconciler::Session;
use crate::resolver::resolve_order;
use std::collections::BTreeMap;
use topo_store::{Interface, InterfaceId, TopologyStore};
use tracing::{debug, info};

impl<S: TopologyStore + ?Sized> Session<'_, S> {
    /// Deletes an interface with everything that only it referenced.
    ///
    /// Children left without any parent are deleted first. Returns the
    /// deleted names, children before parents.
    pub(crate) fn purge_interface(&mut self, id: InterfaceId) -> Result<Vec<String>> {
        let root = self.store.interface(id)?;
        let siblings = self.store.interfaces_on_node(root.node);
        let mut doomed = BTreeMap::from([(root.id, root)]);
        loop {
            let orphaned: Vec<Interface> = siblings
                .iter()
                .filter(|iface| !doomed.contains_key(&iface.id))
                .filter(|iface| {
                    !iface.parents.is_empty()
                        && iface.parents.iter().all(|parent| doomed.contains_key(parent))
                })
                .cloned()
                .collect();
            if orphaned.is_empty() {
                break;
            }
            doomed.extend(orphaned.into_iter().map(|iface| (iface.id, iface)));
        }

        let order = self.deletion_order(&doomed)?;
        let mut deleted = Vec::with_capacity(order.len());
        for id in order {
            if let Some(iface) = doomed.remove(&id) {
                self.delete_one(&iface)?;
                deleted.push(iface.name);
            }
        }
        Ok(deleted)
    }

    /// Deletes every interface in `initial` that still exists and was not
    /// reconciled, children before parents.
    pub(crate) fn delete_stale(&mut self, initial: &[InterfaceId]) -> Result<()> {
        let mut stale = BTreeMap::new();
        for id in initial {
            if self.is_reconciled(*id) {
                continue;
            }
            if let Ok(iface) = self.store.interface(*id) {
                stale.insert(iface.id, iface);
            }
        }
        if stale.is_empty() {
            return Ok(());
        }

        for id in self.deletion_order(&stale)? {
            // Already gone with a purged parent.
            if self.store.interface(id).is_err() {
                continue;
            }
            let deleted = self.purge_interface(id)?;
            self.report.deleted.extend(deleted);
        }
        Ok(())
    }

    /// Orders `set` children first, considering only parents inside it.
    fn deletion_order(&self, set: &BTreeMap<InterfaceId, Interface>) -> Result<Vec<InterfaceId>> {
        let dependencies: BTreeMap<InterfaceId, Vec<InterfaceId>> = set
            .values()
            .map(|iface| {
                let parents = iface
                    .parents
                    .iter()
                    .filter(|parent| set.contains_key(parent))
                    .copied()
                    .collect();
                (iface.id, parents)
            })
            .collect();
        let mut order = resolve_order(&dependencies).map_err(|e| {
            ReconcileError::cycle(
                e.members
                    .iter()
                    .filter_map(|id| set.get(id).map(|iface| iface.name.clone())),
            )
        })?;
        order.reverse();
        Ok(order)
    }

    /// Deletes one interface. Clears the owner's boot interface if it
    /// points here; address records left without an interface go too.
    fn delete_one(&mut self, iface: &Interface) -> Result<()> {
        let mut owner = self.store.node(iface.node)?;
        if owner.boot_interface == Some(iface.id) {
            owner.boot_interface = None;
            self.store.update_node(&owner)?;
            debug!(node = %owner.hostname, interface = %iface.name, "Cleared boot interface");
            if owner.id == self.node.id {
                self.node = owner;
            }
        }

        let addresses = self.store.addresses_on_interface(iface.id);
        self.store.delete_interface(iface.id)?;
        for record in addresses {
            let record = self.store.address(record.id)?;
            if record.interfaces.is_empty() {
                self.store.delete_address(record.id)?;
            }
        }
        self.forget(iface.id);
        info!(interface = %iface.name, id = %iface.id, node = %iface.node, "Deleted interface");
        Ok(())
    }
}
