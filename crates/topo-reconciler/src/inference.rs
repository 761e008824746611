//! VLAN inference for interfaces whose VLAN is not known yet.
//!
//! Evidence is consulted in a fixed order and the first match wins:
//! discovery hints, then subnets matching the observed links, then
//! fallback allocation.

use crate::error::Result;
use crate::links::{link_networks, ObservedLink};
use crate::reconciler::Session;
use crate::snapshot::{Hint, HintKind};
use topo_store::{FabricId, Interface, InterfaceKind, NodeId, TopologyStore, VlanId};
use topo_types::MacAddress;
use tracing::{debug, info};

/// Which evidence decided an inferred VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanSource {
    /// A related interface seen through a discovery hint.
    Hint,
    /// An existing subnet matching one of the links.
    Link,
    /// The unused default VLAN of the default fabric.
    DefaultVlan,
    /// The default VLAN of a fabric created for this interface.
    NewFabric(FabricId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredVlan {
    pub vlan: VlanId,
    pub source: VlanSource,
}

impl<S: TopologyStore + ?Sized> Session<'_, S> {
    /// Picks a VLAN for `ifname`. Always succeeds, allocating a fabric if
    /// nothing else applies.
    pub(crate) fn infer_vlan(
        &mut self,
        ifname: &str,
        links: &[ObservedLink],
        hints: &[Hint],
    ) -> Result<InferredVlan> {
        let inferred = if let Some(vlan) = self.vlan_from_hints(ifname, hints) {
            InferredVlan {
                vlan,
                source: VlanSource::Hint,
            }
        } else if let Some(vlan) = self.vlan_from_links(links) {
            InferredVlan {
                vlan,
                source: VlanSource::Link,
            }
        } else {
            self.fallback_vlan()?
        };
        debug!(interface = ifname, vlan = %inferred.vlan, source = ?inferred.source, "Inferred VLAN");
        Ok(inferred)
    }

    /// VLAN of the first related interface found through an untagged hint
    /// about `ifname` that has a VLAN.
    pub(crate) fn vlan_from_hints(&self, ifname: &str, hints: &[Hint]) -> Option<VlanId> {
        hints
            .iter()
            .filter(|hint| hint.ifname.as_deref() == Some(ifname) && hint.is_untagged())
            .filter_map(|hint| self.find_related(hint))
            .find_map(|related| related.vlan)
    }

    fn find_related(&self, hint: &Hint) -> Option<Interface> {
        let kind = hint.kind()?;
        let related_mac = match hint.related_mac.as_deref() {
            Some(text) => Some(text.parse::<MacAddress>().ok()?),
            None => None,
        };
        let related_ifname = hint.related_ifname.as_deref();

        if kind.is_own_node() {
            let node = Some(self.node.id);
            match related_mac {
                Some(mac) => self.find_physical_or_bridge(mac, related_ifname, node),
                None => related_ifname
                    .and_then(|name| self.store.find_interface_by_name(self.node.id, name))
                    .filter(|iface| {
                        matches!(iface.kind, InterfaceKind::Physical | InterfaceKind::Bridge)
                    }),
            }
        } else {
            self.find_physical_or_bridge(related_mac?, related_ifname, None)
        }
    }

    fn find_physical_or_bridge(
        &self,
        mac: MacAddress,
        name: Option<&str>,
        node: Option<NodeId>,
    ) -> Option<Interface> {
        self.store
            .find_physical_by_mac(mac, node)
            .or_else(|| name.and_then(|name| self.store.find_bridge(name, Some(mac), node)))
    }

    /// VLAN of the existing subnets the links are on; the lowest VLAN
    /// identity wins when they disagree.
    pub(crate) fn vlan_from_links(&self, links: &[ObservedLink]) -> Option<VlanId> {
        link_networks(links)
            .iter()
            .filter_map(|network| self.store.find_subnet_by_cidr(network))
            .map(|subnet| subnet.vlan)
            .min()
    }

    fn fallback_vlan(&mut self) -> Result<InferredVlan> {
        let default = self.store.default_fabric()?;
        if self.store.count_interfaces_on_vlan(default.default_vlan) == 0 {
            return Ok(InferredVlan {
                vlan: default.default_vlan,
                source: VlanSource::DefaultVlan,
            });
        }
        let fabric = self.store.create_fabric()?;
        info!(fabric = %fabric.name, "Created fabric");
        self.fresh_fabrics.push(fabric.id);
        Ok(InferredVlan {
            vlan: fabric.default_vlan,
            source: VlanSource::NewFabric(fabric.id),
        })
    }
}
