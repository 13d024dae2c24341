//! Event Bus Adapter for the Cluster State subsystem
//!
//! Inbound side of the cluster bus:
//!
//! - frames from peers are decoded and applied as deltas;
//! - an inconsistent delta, or events lost to lag, force a full resync;
//! - a departed node's slots are dropped;
//! - vacant records are collected once per retention period;
//! - version and snapshot requests from peers are answered through
//!   `SnapshotResponder`.

use async_trait::async_trait;
use rtc_02_room_registry::RoomRegistry;
use shared_bus::{BusError, ClusterEvent, EventFilter, InMemoryClusterBus, SnapshotResponder, Subscription};
use shared_types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::bus_transport::BusClusterTransport;
use super::codec;
use crate::config::ClusterConfig;
use crate::domain::{ClusterError, ClusterMessage};
use crate::ports::{ClusterApi, ClusterTransport};
use crate::service::ClusterStateManager;

#[async_trait]
impl<T: ClusterTransport + 'static> SnapshotResponder for ClusterStateManager<T> {
    async fn handle_request(&self, from: &NodeId, payload: Vec<u8>) -> Result<Vec<u8>, BusError> {
        let request = codec::decode(&payload).map_err(|e| BusError::Responder(e.to_string()))?;
        debug!(from = %from, request = request.kind(), "Answering peer request");

        let reply = match request {
            ClusterMessage::VersionsRequest => ClusterMessage::Versions(self.versions()),
            ClusterMessage::SnapshotRequest { resources } => {
                ClusterMessage::Snapshot(self.snapshot(resources.as_deref()))
            }
            other => {
                return Err(BusError::Responder(format!(
                    "{} is not a request",
                    other.kind()
                )))
            }
        };
        codec::encode(&reply).map_err(|e| BusError::Responder(e.to_string()))
    }
}

/// Floor on the tombstone collection period.
const MIN_GC_PERIOD: Duration = Duration::from_secs(1);

/// Bus adapter for one cluster node
pub struct ClusterBusAdapter<T: ClusterTransport + 'static> {
    manager: Arc<ClusterStateManager<T>>,
    subscription: Subscription,
}

impl<T: ClusterTransport + 'static> ClusterBusAdapter<T> {
    /// Subscribe the manager's node to the bus and register it as a peer.
    pub fn attach(bus: &Arc<InMemoryClusterBus>, manager: Arc<ClusterStateManager<T>>) -> Self {
        let node = manager.node_id().clone();
        let subscription = bus.subscribe(node.clone(), EventFilter::all());
        bus.join(node, &manager);
        Self { manager, subscription }
    }

    pub fn manager(&self) -> &Arc<ClusterStateManager<T>> {
        &self.manager
    }

    /// Start listening for events
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(node = %self.manager.node_id(), "[ClusterBusAdapter] Started listening for events");

        let period = self.manager.config().tombstone_retention.max(MIN_GC_PERIOD);
        let mut gc_tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        gc_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                event = self.subscription.recv() => event,
                _ = gc_tick.tick() => {
                    self.manager.gc();
                    continue;
                }
            };
            match event {
                Some(event) => self.handle_event(event).await,
                None => {
                    warn!("[ClusterBusAdapter] Event stream ended, shutting down");
                    break;
                }
            }
        }
    }

    /// Handle every event already queued, without waiting for more.
    ///
    /// Returns the number of events handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(Some(event)) = self.subscription.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    async fn handle_event(&mut self, event: ClusterEvent) {
        let missed = self.subscription.take_missed();
        if missed > 0 {
            warn!(node = %self.manager.node_id(), missed, "Cluster events lost, resynchronising");
            self.resync().await;
        }

        match event {
            ClusterEvent::Frame { origin, payload } => self.handle_frame(&origin, &payload).await,
            ClusterEvent::NodeJoined(node) => {
                debug!(node = %node, "Peer joined");
            }
            ClusterEvent::NodeLeft(node) => {
                self.manager.handle_node_left(&node);
            }
        }
    }

    async fn handle_frame(&self, origin: &NodeId, payload: &[u8]) {
        let delta = match codec::decode(payload) {
            Ok(ClusterMessage::Delta(delta)) => delta,
            Ok(other) => {
                debug!(origin = %origin, kind = other.kind(), "Non-delta broadcast ignored");
                return;
            }
            Err(e) => {
                warn!(origin = %origin, error = %e, "Undecodable frame dropped");
                return;
            }
        };

        match self.manager.apply_delta(origin, delta) {
            Ok(_) => {}
            Err(e @ ClusterError::ClusterDesync { .. }) => {
                warn!(origin = %origin, error = %e, "Inconsistent delta, resynchronising");
                self.resync().await;
            }
            Err(e) => error!(origin = %origin, error = %e, "Delta could not be applied"),
        }
    }

    async fn resync(&self) {
        match self.manager.cluster_sync_all().await {
            Ok(report) if report.is_clean() => {}
            Ok(report) => warn!(
                failed_peers = report.failed_peers.len(),
                desynced = report.desynced.len(),
                "Resync incomplete"
            ),
            Err(e) => error!(error = %e, "Resync failed"),
        }
    }
}

/// Wire a node onto a bus: build its transport and manager, and attach the
/// adapter. The node still has to be started.
pub fn join_bus(
    bus: &Arc<InMemoryClusterBus>,
    config: ClusterConfig,
    registry: Arc<RoomRegistry>,
) -> Result<ClusterBusAdapter<BusClusterTransport>, ClusterError> {
    let transport = BusClusterTransport::new(config.node_id.clone(), Arc::clone(bus), config.sync_timeout);
    let manager = Arc::new(ClusterStateManager::new(config, registry, transport)?);
    Ok(ClusterBusAdapter::attach(bus, manager))
}
