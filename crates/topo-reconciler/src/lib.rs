//! Network topology reconciliation engine.
//!
//! Takes a host's self-reported network snapshot and brings the persisted
//! topology graph in line with it: interfaces are created, updated or
//! deleted, VLANs are inferred for interfaces that have none, and IP
//! address records are attached to the subnets they belong to.
//!
//! Interfaces are processed parents first (see [`resolve_order`]); stale
//! interfaces are deleted children first. Reconciling the same snapshot
//! twice performs no mutation the second time.
//!
//! # Example
//!
//! ```
//! use topo_reconciler::{Reconciler, Snapshot};
//! use topo_store::{MemoryStore, NodeStatus, SharedStore};
//!
//! let snapshot = Snapshot::from_json(
//!     r#"{"networks": {"eth0": {"type": "broadcast", "hwaddr": "52:54:00:00:00:01",
//!         "state": "up", "addresses": []}}}"#,
//! )
//! .unwrap();
//! let shared = SharedStore::new(MemoryStore::new());
//! let report = Reconciler::default()
//!     .reconcile_host(&shared, "node1", NodeStatus::Commissioning, &snapshot)
//!     .unwrap();
//! assert_eq!(report.processed, vec!["eth0"]);
//! ```

mod addresses;
pub mod config;
mod deletion;
mod error;
mod inference;
mod interfaces;
mod links;
mod reconciler;
mod report;
pub mod resolver;
pub mod snapshot;

pub use config::{DiscoveryConfig, EngineConfig, ReconcilerConfig, DEFAULT_CONFIG_PATH};
pub use error::{ReconcileError, Result};
pub use inference::{InferredVlan, VlanSource};
pub use links::{build_links, ObservedLink};
pub use reconciler::Reconciler;
pub use report::{Inconsistency, InconsistencyKind, ReconcileReport, SkippedInterface};
pub use resolver::{resolve_layers, resolve_order, CycleError};
pub use snapshot::Snapshot;
