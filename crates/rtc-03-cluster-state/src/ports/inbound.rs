//! # Inbound Ports
//!
//! The surface the transport layer drives.

use crate::domain::{ClusterError, FilterRegistration, SyncReport};
use async_trait::async_trait;
use rtc_02_room_registry::UnsubscribeOutcome;
use shared_types::{ConnectionId, Document, RoomId};
use std::collections::BTreeSet;

/// Cluster API - inbound port.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Subscribe a local connection to a filter and replicate the change.
    async fn register_filter(
        &self,
        body: &Document,
        connection: ConnectionId,
    ) -> Result<FilterRegistration, ClusterError>;

    /// Unsubscribe a local connection from a room and replicate the change.
    ///
    /// Unknown rooms and absent connections are successful no-ops.
    async fn remove_subscription(
        &self,
        room_id: &RoomId,
        connection: &ConnectionId,
    ) -> Result<UnsubscribeOutcome, ClusterError>;

    /// Rooms whose filter matches the document.
    fn test_document(&self, document: &Document) -> BTreeSet<RoomId>;

    /// Pull every resource a peer holds newer state for.
    async fn cluster_sync(&self) -> Result<SyncReport, ClusterError>;

    /// Pull and adopt full snapshots from every reachable peer.
    async fn cluster_sync_all(&self) -> Result<SyncReport, ClusterError>;
}
