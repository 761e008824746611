//! Outcome of one reconciliation run.

use serde::{Deserialize, Serialize};

/// Why a snapshot entry was not modeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInterface {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// A VLAN interface's links are on another fabric than its parent.
    FabricMismatch,
    /// A VLAN interface's links are on a VLAN with a different tag.
    VidMismatch,
    /// An address's subnet is not on the interface's forced VLAN.
    SubnetVlanMismatch,
}

/// A non-fatal disagreement between the snapshot and the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub interface: String,
    pub kind: InconsistencyKind,
    pub message: String,
}

/// Summary returned for a committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub hostname: String,
    /// Modeled interfaces, in processing order.
    pub processed: Vec<String>,
    pub skipped: Vec<SkippedInterface>,
    /// Deleted interfaces, in deletion order.
    pub deleted: Vec<String>,
    pub inconsistencies: Vec<Inconsistency>,
    /// Persisted changes made by the run.
    pub mutations: u64,
}

impl ReconcileReport {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    pub(crate) fn skip(&mut self, name: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedInterface {
            name: name.to_string(),
            reason: reason.into(),
        });
    }

    pub(crate) fn inconsistent(
        &mut self,
        interface: &str,
        kind: InconsistencyKind,
        message: impl Into<String>,
    ) {
        self.inconsistencies.push(Inconsistency {
            interface: interface.to_string(),
            kind,
            message: message.into(),
        });
    }

    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.mutations == 0
    }
}
