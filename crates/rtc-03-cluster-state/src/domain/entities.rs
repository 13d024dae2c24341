//! # Domain Entities
//!
//! Replicated resource records and the messages exchanged between nodes.

use serde::{Deserialize, Serialize};
use shared_types::{FilterId, NodeId, RoomId};
use std::collections::BTreeMap;

use super::value_objects::{Slot, Version};

/// Replicated state of one resource (a filter and its room).
///
/// Records are kept for a retention period after every slot empties so that
/// a late delta carrying an older membership cannot resurrect the room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Room id, derived from the filter id.
    pub resource: RoomId,
    /// Content-addressed filter id.
    pub filter_id: FilterId,
    /// Canonical filter body (JSON text).
    pub filter: String,
    /// Highest version seen for this resource.
    pub version: Version,
    /// Membership per node.
    pub slots: BTreeMap<NodeId, Slot>,
}

impl ResourceRecord {
    /// A record with no members yet.
    pub fn vacant(filter_id: FilterId, filter: String, version: Version) -> Self {
        Self {
            resource: RoomId::for_filter(&filter_id),
            filter_id,
            filter,
            version,
            slots: BTreeMap::new(),
        }
    }

    /// Slot sequence numbers, keyed by node.
    pub fn seqs(&self) -> BTreeMap<NodeId, u64> {
        self.slots
            .iter()
            .map(|(node, slot)| (node.clone(), slot.seq))
            .collect()
    }

    /// Sequence number of a node's slot, 0 if it never wrote one.
    pub fn seq_of(&self, node: &NodeId) -> u64 {
        self.slots.get(node).map_or(0, |slot| slot.seq)
    }

    /// Total connections across nodes.
    pub fn member_count(&self) -> usize {
        self.slots.values().map(|slot| slot.members.len()).sum()
    }

    /// Whether no node holds a connection in the room.
    pub fn is_vacant(&self) -> bool {
        self.slots.values().all(|slot| slot.members.is_empty())
    }

    /// Compact summary advertised to peers.
    pub fn advertised(&self) -> ResourceVersion {
        ResourceVersion {
            resource: self.resource.clone(),
            version: self.version.clone(),
            seqs: self.seqs(),
        }
    }
}

/// What a node advertises about a resource during `cluster_sync`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion {
    /// Resource id.
    pub resource: RoomId,
    /// Record version.
    pub version: Version,
    /// Slot sequence numbers, keyed by node.
    pub seqs: BTreeMap<NodeId, u64>,
}

/// One node's change to its own slot of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDelta {
    /// Resource id.
    pub resource: RoomId,
    /// Content-addressed filter id.
    pub filter_id: FilterId,
    /// Canonical filter body, so receivers can compile it.
    pub filter: String,
    /// Version assigned by the writer.
    pub version: Version,
    /// Writer (and owner of the slot).
    pub node: NodeId,
    /// New slot contents.
    pub slot: Slot,
}

impl ClusterDelta {
    /// The delta as a single-slot record, for merging.
    pub fn into_record(self) -> ResourceRecord {
        ResourceRecord {
            resource: self.resource,
            filter_id: self.filter_id,
            filter: self.filter,
            version: self.version,
            slots: BTreeMap::from([(self.node, self.slot)]),
        }
    }
}

/// Messages exchanged between cluster nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Broadcast after every local mutation.
    Delta(ClusterDelta),
    /// Ask a peer for its resource versions.
    VersionsRequest,
    /// Reply to `VersionsRequest`.
    Versions(Vec<ResourceVersion>),
    /// Ask a peer for full records; `None` asks for every record.
    SnapshotRequest {
        /// Resources wanted.
        resources: Option<Vec<RoomId>>,
    },
    /// Reply to `SnapshotRequest`.
    Snapshot(Vec<ResourceRecord>),
}

impl ClusterMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delta(_) => "delta",
            Self::VersionsRequest => "versions_request",
            Self::Versions(_) => "versions",
            Self::SnapshotRequest { .. } => "snapshot_request",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

/// Which synchronisation ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    /// Version comparison, pulling only newer resources.
    Versions,
    /// Full snapshot of every resource.
    Full,
}

impl SyncKind {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Versions => "versions",
            Self::Full => "full",
        }
    }
}

/// Outcome of a synchronisation round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    /// Which synchronisation ran.
    pub kind: SyncKind,
    /// Peers asked.
    pub peers: usize,
    /// Peers that could not be reached or answered garbage.
    pub failed_peers: Vec<NodeId>,
    /// Records that changed local state.
    pub adopted: usize,
    /// Records rejected as inconsistent.
    pub desynced: Vec<RoomId>,
    /// Own slots re-announced because a peer held a newer copy.
    pub rebroadcast: usize,
}

impl SyncReport {
    /// Empty report for a round.
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            peers: 0,
            failed_peers: Vec::new(),
            adopted: 0,
            desynced: Vec::new(),
            rebroadcast: 0,
        }
    }

    /// Whether every peer answered and every record applied.
    pub fn is_clean(&self) -> bool {
        self.failed_peers.is_empty() && self.desynced.is_empty()
    }
}

/// Result of subscribing a connection through the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterRegistration {
    /// Content-addressed filter id.
    pub filter_id: FilterId,
    /// Room serving the filter.
    pub room_id: RoomId,
    /// False when the connection was already subscribed.
    pub subscribed: bool,
    /// True when the room did not exist before.
    pub room_created: bool,
}

/// Result of applying a peer delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The slot was newer and is now mirrored locally.
    Applied,
    /// The slot was stale or a duplicate.
    Ignored,
}
