//! Cluster transport over the shared cluster bus
//!
//! Deltas are broadcast as frames; version listings and snapshots are
//! request/reply exchanges with a single peer, each bounded by the
//! configured sync timeout.

use async_trait::async_trait;
use shared_bus::{ClusterEvent, EventPublisher, InMemoryClusterBus};
use shared_types::{NodeId, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::codec;
use crate::domain::{ClusterDelta, ClusterError, ClusterMessage, ResourceRecord, ResourceVersion};
use crate::ports::ClusterTransport;

/// `ClusterTransport` backed by an `InMemoryClusterBus`.
pub struct BusClusterTransport {
    node: NodeId,
    bus: Arc<InMemoryClusterBus>,
    request_timeout: Duration,
}

impl BusClusterTransport {
    pub fn new(node: NodeId, bus: Arc<InMemoryClusterBus>, request_timeout: Duration) -> Self {
        Self {
            node,
            bus,
            request_timeout,
        }
    }

    pub fn bus(&self) -> &Arc<InMemoryClusterBus> {
        &self.bus
    }

    /// One request/reply exchange with `peer`.
    async fn exchange(&self, peer: &NodeId, request: &ClusterMessage) -> Result<ClusterMessage, ClusterError> {
        let payload = codec::encode(request)?;
        let reply = tokio::time::timeout(self.request_timeout, self.bus.request(&self.node, peer, payload))
            .await
            .map_err(|_| {
                ClusterError::Transport(format!(
                    "{peer} did not answer {} within {}ms",
                    request.kind(),
                    self.request_timeout.as_millis()
                ))
            })?
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        let reply = codec::decode(&reply)?;
        debug!(peer = %peer, request = request.kind(), reply = reply.kind(), "Peer answered");
        Ok(reply)
    }
}

#[async_trait]
impl ClusterTransport for BusClusterTransport {
    async fn broadcast(&self, delta: &ClusterDelta) -> Result<usize, ClusterError> {
        let payload = codec::encode(&ClusterMessage::Delta(delta.clone()))?;
        let receivers = self
            .bus
            .publish(ClusterEvent::Frame {
                origin: self.node.clone(),
                payload,
            })
            .await;
        Ok(receivers)
    }

    async fn peers(&self) -> Vec<NodeId> {
        self.bus.peers_of(&self.node)
    }

    async fn fetch_versions(&self, peer: &NodeId) -> Result<Vec<ResourceVersion>, ClusterError> {
        match self.exchange(peer, &ClusterMessage::VersionsRequest).await? {
            ClusterMessage::Versions(versions) => Ok(versions),
            other => Err(ClusterError::Codec(format!(
                "expected versions from {peer}, got {}",
                other.kind()
            ))),
        }
    }

    async fn fetch_snapshot(
        &self,
        peer: &NodeId,
        resources: Option<Vec<RoomId>>,
    ) -> Result<Vec<ResourceRecord>, ClusterError> {
        match self
            .exchange(peer, &ClusterMessage::SnapshotRequest { resources })
            .await?
        {
            ClusterMessage::Snapshot(records) => Ok(records),
            other => Err(ClusterError::Codec(format!(
                "expected snapshot from {peer}, got {}",
                other.kind()
            ))),
        }
    }
}
