//! Per-kind interface reconciliation.
//!
//! Each snapshot entry is matched to a stored interface by its kind's
//! identity key:
//!
//! | Kind | Identity |
//! |---|---|
//! | Physical | hardware address |
//! | Bond, Bridge | node, name, parent set |
//! | VLAN | node, name, parent, tag |
//!
//! A stored interface holding the entry's name under a different identity
//! is purged before the entry is modeled.

use crate::addresses::LinkPolicy;
use crate::error::Result;
use crate::links::{build_links, ObservedLink};
use crate::reconciler::Session;
use crate::report::InconsistencyKind;
use crate::snapshot::{AddressExtra, EntryShape, NetworkEntry, Port, Snapshot, VlanEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use topo_store::{
    FabricId, Interface, InterfaceId, InterfaceKind, NewInterface, TopologyStore, VlanId,
};
use topo_types::{MacAddress, VlanTag};
use tracing::{debug, error, info, warn};

impl<S: TopologyStore + ?Sized> Session<'_, S> {
    /// Reconciles one snapshot entry. Returns `None` when the entry is not
    /// modeled.
    pub(crate) fn reconcile_entry(
        &mut self,
        name: &str,
        entry: &NetworkEntry,
        snapshot: &Snapshot,
        address_extra: &BTreeMap<IpAddr, AddressExtra>,
    ) -> Result<Option<InterfaceId>> {
        if !entry.is_broadcast() {
            debug!(interface = name, kind = %entry.kind, "Ignoring non-broadcast interface");
            self.report
                .skip(name, format!("type '{}' is not modeled", entry.kind));
            return Ok(None);
        }

        let hwaddr = match entry.hwaddr.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => match text.parse::<MacAddress>() {
                Ok(mac) => Some(mac),
                Err(_) => {
                    warn!(interface = name, hwaddr = text, "Ignoring malformed hardware address");
                    None
                }
            },
        };
        if let Some(mac) = hwaddr {
            if self.config.is_ignored_mac(&mac) {
                debug!(interface = name, %mac, "Ignoring interface with ignored hardware address");
                self.report
                    .skip(name, format!("hardware address {mac} is ignored"));
                return Ok(None);
            }
        }

        let links = build_links(
            name,
            entry,
            address_extra,
            self.config.engine.widen_host_prefixes,
        );
        match entry.shape() {
            EntryShape::Vlan(vlan) => self.reconcile_vlan(name, entry, vlan, hwaddr, &links),
            EntryShape::Bridge(parents) => {
                self.reconcile_child(name, entry, InterfaceKind::Bridge, parents, hwaddr, &links)
            }
            EntryShape::Bond(parents) => {
                self.reconcile_child(name, entry, InterfaceKind::Bond, parents, hwaddr, &links)
            }
            EntryShape::Physical => {
                let port = snapshot.card_port(name).map(|(_, port)| port);
                self.reconcile_physical(name, entry, hwaddr, port, &links, snapshot)
            }
        }
    }

    fn reconcile_physical(
        &mut self,
        name: &str,
        entry: &NetworkEntry,
        hwaddr: Option<MacAddress>,
        port: Option<&Port>,
        links: &[ObservedLink],
        snapshot: &Snapshot,
    ) -> Result<Option<InterfaceId>> {
        let mac = match port {
            Some(port) => port.address.trim().parse::<MacAddress>().ok(),
            None => hwaddr,
        };
        let Some(mac) = mac else {
            warn!(interface = name, "Skipping physical interface without a valid hardware address");
            self.report.skip(name, "no valid hardware address");
            return Ok(None);
        };
        let enabled = entry.is_up() && port.map_or(true, |port| port.link_detected);

        self.purge_stale_name(name, |existing| {
            existing.kind == InterfaceKind::Physical && existing.mac_address == Some(mac)
        })?;

        let found = match self.store.find_physical_by_mac(mac, None) {
            Some(existing) if existing.node != self.node.id => {
                info!(interface = name, %mac, from = %existing.node, "Hardware address moved to this node");
                self.purge_interface(existing.id)?;
                None
            }
            Some(existing) if self.is_reconciled(existing.id) => {
                warn!(interface = name, %mac, modeled_as = %existing.name, "Skipping duplicate hardware address");
                self.report.skip(
                    name,
                    format!("hardware address {mac} is already modeled as '{}'", existing.name),
                );
                return Ok(None);
            }
            found => found,
        };
        let mut iface = match found {
            Some(iface) => iface,
            None => self.create_interface(NewInterface {
                node: self.node.id,
                name: name.to_string(),
                kind: InterfaceKind::Physical,
                mac_address: Some(mac),
                enabled,
                parents: Vec::new(),
                vlan: None,
                acquired: self.node.acquires_interfaces(),
            })?,
        };

        let may_reassign = iface.vlan.is_none() || enabled;
        iface.name = name.to_string();
        iface.enabled = enabled;
        if iface.vlan.is_none() {
            iface.vlan = Some(self.infer_vlan(name, links, snapshot.hints())?.vlan);
        }
        self.store.update_interface(&iface)?;

        let confirmed = self.update_links(
            &mut iface,
            links,
            LinkPolicy {
                force_vlan: false,
                trust_vlan: true,
            },
        )?;
        if may_reassign {
            if let Some(linked) = self.best_vlan(&confirmed)? {
                self.move_to_vlan(&mut iface, linked)?;
            }
        }
        Ok(Some(iface.id))
    }

    fn reconcile_child(
        &mut self,
        name: &str,
        entry: &NetworkEntry,
        kind: InterfaceKind,
        declared: &[String],
        hwaddr: Option<MacAddress>,
        links: &[ObservedLink],
    ) -> Result<Option<InterfaceId>> {
        let mut parents: Vec<InterfaceId> = Vec::new();
        for parent in declared {
            if let Some(id) = self.reconciled_id(parent) {
                if !parents.contains(&id) {
                    parents.push(id);
                }
            }
        }
        if parents.is_empty() && kind == InterfaceKind::Bond {
            warn!(interface = name, "Skipping bond without modeled parents");
            self.report.skip(name, "bond has no modeled parents");
            return Ok(None);
        }

        let parent_set: BTreeSet<InterfaceId> = parents.iter().copied().collect();
        self.purge_stale_name(name, |existing| {
            existing.kind == kind && existing.parent_set() == parent_set
        })?;

        let enabled = entry.is_up();
        let mut iface = match self.store.find_interface_by_name(self.node.id, name) {
            Some(iface) => iface,
            None => self.create_interface(NewInterface {
                node: self.node.id,
                name: name.to_string(),
                kind,
                mac_address: hwaddr,
                enabled,
                parents: parents.clone(),
                vlan: None,
                acquired: true,
            })?,
        };
        let may_reassign = iface.vlan.is_none() || enabled;
        iface.mac_address = hwaddr;
        iface.enabled = enabled;
        iface.parents = parents.clone();

        let found = match self.vlan_from_links(links) {
            Some(vlan) => Some(vlan),
            None => match parents.first() {
                Some(first) => self.store.interface(*first)?.vlan,
                None => None,
            },
        };
        if let Some(vlan) = found {
            if may_reassign {
                iface.vlan = Some(vlan);
            }
        }
        self.store.update_interface(&iface)?;

        let confirmed = self.update_links(
            &mut iface,
            links,
            LinkPolicy {
                force_vlan: false,
                trust_vlan: found.is_some(),
            },
        )?;
        if let Some(linked) = self.best_vlan(&confirmed)? {
            if may_reassign {
                self.move_to_vlan(&mut iface, linked)?;
            }
            for parent in &parents {
                let mut parent = self.store.interface(*parent)?;
                self.move_to_vlan(&mut parent, linked)?;
            }
        }
        Ok(Some(iface.id))
    }

    fn reconcile_vlan(
        &mut self,
        name: &str,
        entry: &NetworkEntry,
        vlan_entry: &VlanEntry,
        hwaddr: Option<MacAddress>,
        links: &[ObservedLink],
    ) -> Result<Option<InterfaceId>> {
        let tag = match VlanTag::try_from(vlan_entry.vid) {
            Ok(tag) => tag,
            Err(e) => {
                warn!(interface = name, error = %e, "Skipping VLAN interface with invalid tag");
                self.report.skip(name, e.to_string());
                return Ok(None);
            }
        };
        let Some(parent_id) = self.reconciled_id(&vlan_entry.lower_device) else {
            warn!(interface = name, parent = %vlan_entry.lower_device, "Skipping VLAN interface without modeled parent");
            self.report.skip(
                name,
                format!("parent '{}' is not modeled", vlan_entry.lower_device),
            );
            return Ok(None);
        };
        let parent = self.store.interface(parent_id)?;
        let current = self
            .store
            .find_interface_by_name(self.node.id, name)
            .filter(|current| {
                current.kind == InterfaceKind::Vlan && current.parents == [parent_id]
            });

        let vlan = match self.vlan_from_links(links) {
            Some(linked) => {
                self.check_vlan_evidence(name, &parent, linked, tag)?;
                linked
            }
            None => match parent.vlan {
                Some(parent_vlan) => {
                    let fabric = self.store.vlan(parent_vlan)?.fabric;
                    self.vlan_in_fabric(fabric, tag)?
                }
                None => match current.as_ref().and_then(|current| current.vlan) {
                    Some(existing) => existing,
                    None => {
                        let fabric = self.store.create_fabric()?;
                        info!(interface = name, fabric = %fabric.name, "Created fabric for VLAN interface");
                        self.vlan_in_fabric(fabric.id, tag)?
                    }
                },
            },
        };

        let mut current = match current {
            Some(current) if self.vlan_matches(&current, vlan, tag)? => Some(current),
            _ => None,
        };
        self.purge_stale_name(name, |existing| {
            current.as_ref().is_some_and(|current| current.id == existing.id)
        })?;

        let enabled = entry.is_up();
        let mut iface = match current.take() {
            Some(iface) => iface,
            None => self.create_interface(NewInterface {
                node: self.node.id,
                name: name.to_string(),
                kind: InterfaceKind::Vlan,
                mac_address: hwaddr,
                enabled,
                parents: vec![parent_id],
                vlan: Some(vlan),
                acquired: true,
            })?,
        };
        let may_reassign = iface.vlan.is_none() || enabled;
        iface.mac_address = hwaddr;
        iface.enabled = enabled;
        if may_reassign {
            iface.vlan = Some(vlan);
        } else if iface.vlan != Some(vlan) {
            debug!(interface = name, "Keeping VLAN of disabled interface");
        }
        self.store.update_interface(&iface)?;

        self.update_links(
            &mut iface,
            links,
            LinkPolicy {
                force_vlan: true,
                trust_vlan: true,
            },
        )?;
        Ok(Some(iface.id))
    }

    /// Whether a stored VLAN interface still carries the expected tag, or
    /// already sits on the VLAN chosen for it.
    fn vlan_matches(&self, current: &Interface, chosen: VlanId, tag: VlanTag) -> Result<bool> {
        match current.vlan {
            None => Ok(true),
            Some(vlan) if vlan == chosen => Ok(true),
            Some(vlan) => Ok(self.store.vlan(vlan)?.vid == tag),
        }
    }

    /// Reports link evidence that disagrees with the parent's fabric or the
    /// interface's tag.
    fn check_vlan_evidence(
        &mut self,
        name: &str,
        parent: &Interface,
        linked: VlanId,
        tag: VlanTag,
    ) -> Result<()> {
        let linked_vlan = self.store.vlan(linked)?;
        if let Some(parent_vlan) = parent.vlan {
            if self.store.vlan(parent_vlan)?.fabric != linked_vlan.fabric {
                let message = format!(
                    "interface '{}' on '{}' is not on the same fabric as VLAN interface '{name}'",
                    parent.name, self.node.hostname
                );
                error!(interface = name, parent = %parent.name, "{}", message);
                self.report
                    .inconsistent(name, InconsistencyKind::FabricMismatch, message);
            }
        }
        if linked_vlan.vid != tag {
            let message = format!(
                "VLAN interface '{name}' reports VLAN {tag} but links are on VLAN {}",
                linked_vlan.vid
            );
            error!(interface = name, "{}", message);
            self.report
                .inconsistent(name, InconsistencyKind::VidMismatch, message);
        }
        Ok(())
    }

    fn vlan_in_fabric(&mut self, fabric: FabricId, tag: VlanTag) -> Result<VlanId> {
        if let Some(vlan) = self.store.find_vlan(fabric, tag) {
            return Ok(vlan.id);
        }
        let vlan = self.store.create_vlan(fabric, tag)?;
        info!(%fabric, vid = %tag, "Created VLAN");
        Ok(vlan.id)
    }

    fn create_interface(&mut self, new: NewInterface) -> Result<Interface> {
        let iface = self.store.create_interface(new)?;
        info!(interface = %iface.name, id = %iface.id, kind = %iface.kind, "Created interface");
        Ok(iface)
    }

    /// Purges the interface named `name` on this node unless `keep`
    /// accepts it.
    fn purge_stale_name<F>(&mut self, name: &str, keep: F) -> Result<()>
    where
        F: Fn(&Interface) -> bool,
    {
        if let Some(existing) = self.store.find_interface_by_name(self.node.id, name) {
            if !keep(&existing) {
                info!(interface = name, id = %existing.id, "Replacing interface with a different identity");
                self.purge_interface(existing.id)?;
            }
        }
        Ok(())
    }

    fn move_to_vlan(&mut self, iface: &mut Interface, vlan: VlanId) -> Result<()> {
        if iface.vlan != Some(vlan) {
            debug!(interface = %iface.name, from = ?iface.vlan, to = %vlan, "Moving interface to address VLAN");
            iface.vlan = Some(vlan);
            self.store.update_interface(iface)?;
        }
        Ok(())
    }
}
