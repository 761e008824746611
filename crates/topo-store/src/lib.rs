//! Persisted topology graph for the reconciliation engine.
//!
//! This crate provides the entity model and the store abstraction the
//! engine runs against:
//!
//! - [`TopologyStore`]: unit-of-work interface over nodes, interfaces,
//!   fabrics, VLANs, subnets and IP address records
//! - [`MemoryStore`]: in-memory implementation that counts mutations
//! - [`SharedStore`]: thread-safe wrapper with commit/rollback transactions
//!
//! # Example
//!
//! ```
//! use topo_store::{MemoryStore, NodeStatus, SharedStore, StoreError, TopologyStore};
//!
//! let shared = SharedStore::new(MemoryStore::new());
//! shared
//!     .transaction(|store| {
//!         store.create_node("node1", NodeStatus::Commissioning)?;
//!         Ok::<_, StoreError>(())
//!     })
//!     .unwrap();
//! assert!(shared.snapshot().find_node_by_hostname("node1").is_some());
//! ```

mod error;
mod memory;
pub mod model;
mod shared;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{GraphState, MemoryStore};
pub use model::{
    AddressId, AllocClass, DiscoveryState, Fabric, FabricId, Interface, InterfaceId,
    InterfaceKind, IpAddressRecord, NewAddress, NewInterface, NewSubnet, Node, NodeId,
    NodeStatus, PortDetails, Subnet, SubnetId, Vlan, VlanId,
};
pub use shared::{SharedStore, Transaction};
pub use store::TopologyStore;
