//! IP address lifecycle of one interface.

use crate::error::Result;
use crate::links::ObservedLink;
use crate::reconciler::Session;
use crate::report::InconsistencyKind;
use std::net::IpAddr;
use topo_store::{
    AllocClass, Interface, IpAddressRecord, NewAddress, NewSubnet, Subnet, TopologyStore, VlanId,
};
use topo_types::IpPrefix;
use tracing::{debug, error, info};

/// How [`Session::update_links`] treats the interface's VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkPolicy {
    /// Skip addresses whose subnet is on another VLAN than the interface.
    pub force_vlan: bool,
    /// Use the interface's VLAN for new subnets.
    pub trust_vlan: bool,
}

impl<S: TopologyStore + ?Sized> Session<'_, S> {
    /// Brings the address records attached to `iface` in line with `links`.
    ///
    /// DISCOVERED records are rebuilt: those not confirmed again are
    /// deleted. Every other attached record not confirmed again is only
    /// detached. Returns the confirmed records in confirmation order.
    pub(crate) fn update_links(
        &mut self,
        iface: &mut Interface,
        links: &[ObservedLink],
        policy: LinkPolicy,
    ) -> Result<Vec<IpAddressRecord>> {
        let (mut discovered, mut prior): (Vec<_>, Vec<_>) = self
            .store
            .addresses_on_interface(iface.id)
            .into_iter()
            .partition(|record| record.alloc == AllocClass::Discovered);
        let mut confirmed = Vec::new();

        let vlan = match iface.vlan {
            Some(vlan) if policy.trust_vlan => Some(vlan),
            _ if !links.is_empty() => {
                let fabric = self.store.create_fabric()?;
                info!(interface = %iface.name, fabric = %fabric.name, "Created fabric for unplaced links");
                iface.vlan = Some(fabric.default_vlan);
                self.store.update_interface(iface)?;
                Some(fabric.default_vlan)
            }
            _ => None,
        };

        if let Some(vlan) = vlan {
            for link in links {
                match link {
                    ObservedLink::Dynamic { address } => {
                        let placeholder = match take_where(&mut prior, |r| {
                            r.alloc == AllocClass::DhcpPending
                        }) {
                            Some(record) => record,
                            None => {
                                let record = self.store.create_address(NewAddress {
                                    ip: None,
                                    alloc: AllocClass::DhcpPending,
                                    subnet: None,
                                })?;
                                self.store.attach_address(record.id, iface.id)?;
                                record
                            }
                        };
                        confirmed.push(placeholder);

                        if let Some(address) = address {
                            if let Some(record) = self.confirm_leased(
                                iface,
                                *address,
                                vlan,
                                policy,
                                &mut prior,
                                &mut discovered,
                            )? {
                                confirmed.push(record);
                            }
                        }
                    }
                    ObservedLink::Fixed {
                        address,
                        gateway,
                        alloc_hint,
                    } => {
                        if let Some(record) = self.confirm_fixed(
                            iface,
                            *address,
                            *gateway,
                            *alloc_hint,
                            vlan,
                            policy,
                            &mut prior,
                            &mut discovered,
                        )? {
                            confirmed.push(record);
                        }
                    }
                }
            }
        }

        for record in prior {
            if self.store.detach_address(record.id, iface.id)? {
                debug!(interface = %iface.name, address = ?record.ip, "Detached address");
            }
        }
        for record in discovered {
            self.store.detach_address(record.id, iface.id)?;
            if self.store.address(record.id)?.interfaces.is_empty() {
                self.store.delete_address(record.id)?;
                debug!(interface = %iface.name, address = ?record.ip, "Dropped discovered address");
            }
        }
        Ok(confirmed)
    }

    /// An address leased over DHCP and seen on the host.
    fn confirm_leased(
        &mut self,
        iface: &Interface,
        address: IpPrefix,
        vlan: VlanId,
        policy: LinkPolicy,
        prior: &mut Vec<IpAddressRecord>,
        discovered: &mut Vec<IpAddressRecord>,
    ) -> Result<Option<IpAddressRecord>> {
        let ip = address.address();
        let subnet = self.subnet_for(address.network(), vlan)?;
        if !self.subnet_fits(iface, &subnet, ip, policy)? {
            return Ok(None);
        }

        let mut record = match self.take_record(ip, prior, discovered) {
            Some(record) => record,
            None => self.store.create_address(NewAddress {
                ip: Some(ip),
                alloc: AllocClass::Discovered,
                subnet: Some(subnet.id),
            })?,
        };
        record.alloc = AllocClass::Discovered;
        record.subnet = Some(subnet.id);
        self.store.update_address(&record)?;
        self.store.attach_address(record.id, iface.id)?;
        Ok(Some(record))
    }

    #[allow(clippy::too_many_arguments)]
    fn confirm_fixed(
        &mut self,
        iface: &Interface,
        address: IpPrefix,
        gateway: Option<IpAddr>,
        alloc_hint: Option<AllocClass>,
        vlan: VlanId,
        policy: LinkPolicy,
        prior: &mut Vec<IpAddressRecord>,
        discovered: &mut Vec<IpAddressRecord>,
    ) -> Result<Option<IpAddressRecord>> {
        let ip = address.address();
        let mut subnet = self.subnet_for(address.network(), vlan)?;
        if !self.subnet_fits(iface, &subnet, ip, policy)? {
            return Ok(None);
        }

        if let Some(gateway) = gateway {
            if subnet.gateway.is_none() && subnet.cidr.contains(&gateway) {
                subnet.gateway = Some(gateway);
                self.store.update_subnet(&subnet)?;
                info!(subnet = %subnet.cidr, %gateway, "Set subnet gateway");
            }
        }

        let alloc = alloc_hint.unwrap_or(if self.node.is_commissioning() {
            AllocClass::Discovered
        } else {
            AllocClass::Sticky
        });
        let mut record = match self.take_record(ip, prior, discovered) {
            Some(record) => record,
            None => self.store.create_address(NewAddress {
                ip: Some(ip),
                alloc,
                subnet: Some(subnet.id),
            })?,
        };

        for attached in record.interfaces.clone() {
            if attached == iface.id {
                continue;
            }
            let owner = self.store.interface(attached)?;
            if owner.node != self.node.id {
                self.store.detach_address(record.id, attached)?;
                info!(%ip, from = %owner.name, node = %owner.node, "Moved address from another node");
            }
        }

        record.alloc = alloc;
        record.subnet = Some(subnet.id);
        self.store.update_address(&record)?;
        self.store.attach_address(record.id, iface.id)?;
        Ok(Some(record))
    }

    /// Finds the record for `ip`: among the interface's own records first,
    /// then anywhere.
    fn take_record(
        &self,
        ip: IpAddr,
        prior: &mut Vec<IpAddressRecord>,
        discovered: &mut Vec<IpAddressRecord>,
    ) -> Option<IpAddressRecord> {
        take_where(prior, |r| r.ip == Some(ip))
            .or_else(|| take_where(discovered, |r| r.ip == Some(ip)))
            .or_else(|| self.store.find_address_by_ip(&ip))
    }

    /// Finds the subnet for `cidr`, creating it on `vlan` if needed.
    pub(crate) fn subnet_for(&mut self, cidr: IpPrefix, vlan: VlanId) -> Result<Subnet> {
        if let Some(subnet) = self.store.find_subnet_by_cidr(&cidr) {
            return Ok(subnet);
        }
        let subnet = self.store.create_subnet(NewSubnet {
            name: cidr.to_string(),
            cidr,
            gateway: None,
            vlan,
        })?;
        info!(subnet = %subnet.cidr, vlan = %vlan, "Created subnet");
        Ok(subnet)
    }

    /// Under `force_vlan`, reports and rejects a subnet on another VLAN
    /// than the interface.
    fn subnet_fits(
        &mut self,
        iface: &Interface,
        subnet: &Subnet,
        ip: IpAddr,
        policy: LinkPolicy,
    ) -> Result<bool> {
        if !policy.force_vlan || iface.vlan == Some(subnet.vlan) {
            return Ok(true);
        }
        let vlan = self.store.vlan(subnet.vlan)?;
        let fabric = self.store.fabric(vlan.fabric)?;
        let message = format!(
            "unable to update IP address '{ip}' assigned to interface '{}' on '{}': subnet '{}' is not on VLAN '{}.{}'",
            iface.name, self.node.hostname, subnet.name, fabric.name, vlan.vid
        );
        error!(interface = %iface.name, %ip, subnet = %subnet.cidr, "{}", message);
        self.report
            .inconsistent(&iface.name, InconsistencyKind::SubnetVlanMismatch, message);
        Ok(false)
    }

    /// The VLAN the confirmed addresses point at: the first STICKY
    /// address's subnet VLAN, else the first DISCOVERED one's.
    pub(crate) fn best_vlan(&self, confirmed: &[IpAddressRecord]) -> Result<Option<VlanId>> {
        let subnet_of = |class: AllocClass| {
            confirmed
                .iter()
                .filter(|record| record.alloc == class)
                .find_map(|record| record.subnet)
        };
        match subnet_of(AllocClass::Sticky).or_else(|| subnet_of(AllocClass::Discovered)) {
            Some(subnet) => Ok(Some(self.store.subnet(subnet)?.vlan)),
            None => Ok(None),
        }
    }
}

fn take_where<F>(records: &mut Vec<IpAddressRecord>, predicate: F) -> Option<IpAddressRecord>
where
    F: Fn(&IpAddressRecord) -> bool,
{
    let index = records.iter().position(predicate)?;
    Some(records.remove(index))
}
