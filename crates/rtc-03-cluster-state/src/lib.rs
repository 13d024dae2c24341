//! # RTC-03 Cluster State
//!
//! Replicates room membership across the nodes of a cluster.
//!
//! **Subsystem ID:** 3
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Every node serves its own connections but matches documents against the
//! rooms of the whole cluster:
//! - Per-resource locks serialise create, delete and sync operations
//! - Every local change is broadcast as a versioned delta of the writer's slot
//! - Version comparison and full snapshots repair whatever deltas missed
//!
//! ## Replication model
//!
//! | Concept | Rule |
//! |---------|------|
//! | Resource | One per distinct filter; id derived from the filter id |
//! | Slot | The connections one node holds; only that node writes it |
//! | Slot merge | Highest `seq` wins |
//! | Version | `(counter, node)`, record keeps the maximum seen |
//! | Tombstone | Records outlive their last member |
//!
//! ## Module Structure
//!
//! ```text
//! rtc-03-cluster-state/
//! ├── domain/          # Records, deltas, versions, lock states, errors
//! ├── algorithms/      # Lock manager, record reconciliation
//! ├── ports/           # ClusterApi + ClusterTransport
//! ├── service/         # ClusterStateManager
//! └── adapters/        # Wire codec, bus transport, bus adapter
//! ```

#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

// Re-exports
pub use adapters::{join_bus, BusClusterTransport, ClusterBusAdapter};
pub use algorithms::{LockGuard, LockManager};
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use domain::{
    ClusterDelta, ClusterError, ClusterMessage, DeltaOutcome, FilterRegistration, LockMode,
    ResourceRecord, ResourceState, ResourceVersion, Slot, SyncKind, SyncReport, Version,
};
pub use ports::{ClusterApi, ClusterTransport, MockTransport};
pub use service::ClusterStateManager;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
