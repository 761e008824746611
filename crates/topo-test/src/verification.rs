//! Verification helpers for reconciled graphs
//!
//! Each check returns a [`VerifyResult`] so a failing scenario names the
//! entity and value that differed.

use std::collections::BTreeSet;
use std::net::IpAddr;
use thiserror::Error;
use topo_store::{AllocClass, Interface, NodeId, StoreError, TopologyStore, VlanId};
use topo_types::IpPrefix;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("expected interface '{name}' on {node}")]
    InterfaceNotFound { node: NodeId, name: String },

    #[error("expected no interface '{name}' on {node}")]
    UnexpectedInterface { node: NodeId, name: String },

    #[error("no record for {what}")]
    Missing { what: String },

    #[error("mismatch for {what}: expected {expected}, got {actual}")]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },
}

pub type VerifyResult<T> = Result<T, VerificationError>;

fn mismatch(
    what: impl Into<String>,
    expected: impl ToString,
    actual: impl ToString,
) -> VerificationError {
    VerificationError::Mismatch {
        what: what.into(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Assertions over one node's part of the graph
pub struct GraphVerifier<'a, S: TopologyStore + ?Sized> {
    store: &'a S,
    node: NodeId,
}

impl<'a, S: TopologyStore + ?Sized> GraphVerifier<'a, S> {
    pub fn new(store: &'a S, node: NodeId) -> Self {
        Self { store, node }
    }

    /// The interface named `name`
    pub fn interface(&self, name: &str) -> VerifyResult<Interface> {
        self.store
            .find_interface_by_name(self.node, name)
            .ok_or_else(|| VerificationError::InterfaceNotFound {
                node: self.node,
                name: name.to_string(),
            })
    }

    pub fn assert_absent(&self, name: &str) -> VerifyResult<()> {
        match self.store.find_interface_by_name(self.node, name) {
            Some(_) => Err(VerificationError::UnexpectedInterface {
                node: self.node,
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Interface names on the node, sorted
    pub fn interface_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .interfaces_on_node(self.node)
            .into_iter()
            .map(|iface| iface.name)
            .collect();
        names.sort();
        names
    }

    pub fn assert_vlan(&self, name: &str, expected: VlanId) -> VerifyResult<()> {
        let iface = self.interface(name)?;
        match iface.vlan {
            Some(vlan) if vlan == expected => Ok(()),
            Some(vlan) => Err(mismatch(format!("VLAN of '{name}'"), expected, vlan)),
            None => Err(mismatch(format!("VLAN of '{name}'"), expected, "none")),
        }
    }

    /// Parents of `name`, by name and in stored order
    pub fn parent_names(&self, name: &str) -> VerifyResult<Vec<String>> {
        let iface = self.interface(name)?;
        iface
            .parents
            .iter()
            .map(|parent| Ok(self.store.interface(*parent)?.name))
            .collect()
    }

    /// IPs attached to `name`; DHCP placeholders are left out
    pub fn attached_ips(&self, name: &str) -> VerifyResult<BTreeSet<IpAddr>> {
        let iface = self.interface(name)?;
        Ok(self
            .store
            .addresses_on_interface(iface.id)
            .into_iter()
            .filter_map(|record| record.ip)
            .collect())
    }

    pub fn assert_attached(&self, name: &str, expected: &[&str]) -> VerifyResult<()> {
        let actual = self.attached_ips(name)?;
        let expected: BTreeSet<IpAddr> = expected
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        if actual == expected {
            Ok(())
        } else {
            Err(mismatch(
                format!("addresses of '{name}'"),
                format!("{expected:?}"),
                format!("{actual:?}"),
            ))
        }
    }

    /// Allocation class of the record holding `ip`
    pub fn assert_alloc(&self, ip: &str, expected: AllocClass) -> VerifyResult<()> {
        let record = ip
            .parse::<IpAddr>()
            .ok()
            .and_then(|ip| self.store.find_address_by_ip(&ip))
            .ok_or_else(|| VerificationError::Missing {
                what: format!("address {ip}"),
            })?;
        if record.alloc == expected {
            Ok(())
        } else {
            Err(mismatch(
                format!("class of {ip}"),
                format!("{expected:?}"),
                format!("{:?}", record.alloc),
            ))
        }
    }

    /// Gateway of the subnet `cidr`
    pub fn assert_gateway(&self, cidr: &str, expected: Option<&str>) -> VerifyResult<()> {
        let subnet = cidr
            .parse::<IpPrefix>()
            .ok()
            .and_then(|cidr| self.store.find_subnet_by_cidr(&cidr))
            .ok_or_else(|| VerificationError::Missing {
                what: format!("subnet {cidr}"),
            })?;
        let expected: Option<IpAddr> = expected.and_then(|gw| gw.parse().ok());
        if subnet.gateway == expected {
            Ok(())
        } else {
            Err(mismatch(
                format!("gateway of {cidr}"),
                format!("{expected:?}"),
                format!("{:?}", subnet.gateway),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreFixture;
    use topo_store::NodeStatus;

    #[test]
    fn test_graph_verifier() {
        let mut fixture = StoreFixture::new();
        let node = fixture.node("node1", NodeStatus::Deployed).unwrap();
        let vlan = fixture.default_fabric().unwrap().default_vlan;
        let subnet = fixture
            .subnet("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().ok(), vlan)
            .unwrap();
        let eth0 = fixture
            .physical(node, "eth0", "52:54:00:00:00:01".parse().unwrap(), Some(vlan))
            .unwrap();
        fixture
            .address("10.0.0.5".parse().unwrap(), AllocClass::Sticky, Some(subnet), eth0)
            .unwrap();

        let verifier = GraphVerifier::new(&fixture.store, node);
        assert!(verifier.assert_vlan("eth0", vlan).is_ok());
        assert!(verifier.assert_attached("eth0", &["10.0.0.5"]).is_ok());
        assert!(verifier.assert_attached("eth0", &[]).is_err());
        assert!(verifier.assert_alloc("10.0.0.5", AllocClass::Sticky).is_ok());
        assert!(verifier.assert_alloc("10.0.0.5", AllocClass::Discovered).is_err());
        assert!(verifier.assert_gateway("10.0.0.0/24", Some("10.0.0.1")).is_ok());
        assert!(verifier.assert_absent("eth1").is_ok());
        assert!(matches!(
            verifier.interface("eth1"),
            Err(VerificationError::InterfaceNotFound { .. })
        ));
        assert_eq!(verifier.interface_names(), vec!["eth0".to_string()]);
    }
}
