//! Test infrastructure for the topology reconciler
//!
//! Provides:
//! - Snapshot builders producing the host's JSON wire form
//! - Store fixtures seeding the graph a scenario starts from
//! - Verification helpers over a reconciled graph

pub mod fixtures;
mod verification;

pub use fixtures::*;
pub use verification::*;
