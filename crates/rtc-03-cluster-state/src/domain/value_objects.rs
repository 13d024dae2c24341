//! # Domain Value Objects
//!
//! Lock states, versions and per-node membership slots.

use serde::{Deserialize, Serialize};
use shared_types::{ConnectionId, NodeId};
use std::collections::BTreeSet;
use tokio::time::Instant;

/// Per-resource lock state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResourceState {
    /// No operation in flight.
    #[default]
    Idle,
    /// A subscription is being added.
    LockedForCreate,
    /// A subscription is being removed.
    LockedForDelete,
    /// Peer state is being adopted.
    LockedForSync,
}

impl ResourceState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ResourceState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Idle) => false,
            (Self::Idle, _) => true,
            (_, Self::Idle) => true,
            // A resync takes over any lock.
            (_, Self::LockedForSync) => true,
            _ => false,
        }
    }

    /// Whether an operation holds the resource.
    pub fn is_locked(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// How long a caller is prepared to wait for a resource lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Fail with `ResourceBusy` if the lock is held.
    TryOnce,
    /// Queue until the lock is free or the deadline passes.
    Until(Instant),
}

/// Resource version.
///
/// Ordered by counter, then by the id of the node that assigned it, so
/// concurrent writers resolve last-writer-wins without ties.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    /// Monotonic per-resource counter.
    pub counter: u64,
    /// Node that assigned this version.
    pub node: NodeId,
}

impl Version {
    /// Version of a resource nobody has written yet.
    pub fn initial(node: NodeId) -> Self {
        Self { counter: 0, node }
    }

    /// The version `node` assigns when it next writes the resource.
    pub fn next(&self, node: &NodeId) -> Self {
        Self {
            counter: self.counter + 1,
            node: node.clone(),
        }
    }
}

/// The connections one node holds in a room.
///
/// Only the owning node writes its slot; `seq` increases on every write so
/// replicas keep the highest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Write sequence number.
    pub seq: u64,
    /// Connections held by the owning node.
    pub members: BTreeSet<ConnectionId>,
}

impl Slot {
    /// Whether this slot supersedes `other`.
    pub fn supersedes(&self, other: &Slot) -> bool {
        self.seq > other.seq
    }
}
