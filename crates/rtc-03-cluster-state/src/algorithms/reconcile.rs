//! # Record Reconciliation
//!
//! Merge rules for replicated resource records:
//!
//! - each slot is last-writer-wins on its `seq`;
//! - a node's own slot is never taken from a peer, a peer holding a higher
//!   `seq` for it only forces the owner to re-announce;
//! - the record version is the maximum seen.
//!
//! Merging is commutative and idempotent, so replaying deltas or snapshots in
//! any order converges.

use shared_types::{ConnectionId, NodeId};
use std::collections::BTreeSet;

use crate::domain::{ClusterDelta, ResourceRecord, ResourceVersion, Slot};

/// What a merge changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Nodes whose slot was replaced.
    pub changed: Vec<NodeId>,
    /// Highest `seq` a peer holds for our own slot, when above ours.
    pub own_seq_ahead: Option<u64>,
    /// Whether the record version moved forward.
    pub version_advanced: bool,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.own_seq_ahead.is_none() && !self.version_advanced
    }
}

/// Merge `remote` into `local`.
pub fn merge_record(local: &mut ResourceRecord, remote: &ResourceRecord, own: &NodeId) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (node, slot) in &remote.slots {
        if node == own {
            if slot.seq > local.seq_of(own) {
                outcome.own_seq_ahead = Some(slot.seq);
            }
            continue;
        }
        let stale = local
            .slots
            .get(node)
            .is_some_and(|current| !slot.supersedes(current));
        if !stale {
            local.slots.insert(node.clone(), slot.clone());
            outcome.changed.push(node.clone());
        }
    }

    if remote.version > local.version {
        local.version = remote.version.clone();
        outcome.version_advanced = true;
    }
    outcome
}

/// Replace our own slot and stamp a new version.
///
/// The new `seq` is above both the current one and `floor` (a peer's copy).
pub fn write_own_slot(
    record: &mut ResourceRecord,
    own: &NodeId,
    members: BTreeSet<ConnectionId>,
    floor: u64,
) -> ClusterDelta {
    let seq = record.seq_of(own).max(floor) + 1;
    let slot = Slot { seq, members };
    record.slots.insert(own.clone(), slot.clone());
    record.version = record.version.next(own);

    ClusterDelta {
        resource: record.resource.clone(),
        filter_id: record.filter_id.clone(),
        filter: record.filter.clone(),
        version: record.version.clone(),
        node: own.clone(),
        slot,
    }
}

/// Whether a peer's advertised state holds anything we lack.
pub fn is_newer(remote: &ResourceVersion, local: Option<&ResourceRecord>) -> bool {
    let Some(local) = local else {
        return true;
    };
    remote.version > local.version
        || remote
            .seqs
            .iter()
            .any(|(node, seq)| *seq > local.seq_of(node))
}
