//! # Outbound Ports
//!
//! What the cluster state manager needs from the network.

use crate::domain::{ClusterDelta, ClusterError, ResourceRecord, ResourceVersion};
use async_trait::async_trait;
use shared_types::{NodeId, RoomId};

/// Cluster transport - outbound port.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Send a delta to every reachable peer. Returns the number of receivers.
    async fn broadcast(&self, delta: &ClusterDelta) -> Result<usize, ClusterError>;

    /// Peers currently reachable from this node.
    async fn peers(&self) -> Vec<NodeId>;

    /// Ask a peer which resources it holds and at which versions.
    async fn fetch_versions(&self, peer: &NodeId) -> Result<Vec<ResourceVersion>, ClusterError>;

    /// Pull full records from a peer; `None` pulls every record.
    async fn fetch_snapshot(
        &self,
        peer: &NodeId,
        resources: Option<Vec<RoomId>>,
    ) -> Result<Vec<ResourceRecord>, ClusterError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Transport for a node with no peers; records what it broadcasts.
#[derive(Default)]
pub struct MockTransport {
    /// Deltas broadcast so far.
    pub sent: parking_lot::Mutex<Vec<ClusterDelta>>,
    /// Fail every broadcast with a transport error.
    pub fail_broadcast: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose broadcasts always fail.
    pub fn failing() -> Self {
        Self {
            fail_broadcast: true,
            ..Self::default()
        }
    }

    /// Deltas broadcast so far.
    pub fn sent(&self) -> Vec<ClusterDelta> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ClusterTransport for MockTransport {
    async fn broadcast(&self, delta: &ClusterDelta) -> Result<usize, ClusterError> {
        if self.fail_broadcast {
            return Err(ClusterError::Transport("broadcast disabled".to_string()));
        }
        self.sent.lock().push(delta.clone());
        Ok(0)
    }

    async fn peers(&self) -> Vec<NodeId> {
        Vec::new()
    }

    async fn fetch_versions(&self, peer: &NodeId) -> Result<Vec<ResourceVersion>, ClusterError> {
        Err(ClusterError::Transport(format!("unknown peer {peer}")))
    }

    async fn fetch_snapshot(
        &self,
        peer: &NodeId,
        _resources: Option<Vec<RoomId>>,
    ) -> Result<Vec<ResourceRecord>, ClusterError> {
        Err(ClusterError::Transport(format!("unknown peer {peer}")))
    }
}
