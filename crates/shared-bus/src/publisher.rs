//! # Cluster Bus
//!
//! Broadcast side of the bus plus the peer directory used to route
//! point-to-point requests (version listings, snapshots) between nodes.

use crate::events::{BusError, ClusterEvent, EventFilter};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use shared_types::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Trait for publishing events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// # Returns
    ///
    /// The number of active subscribers that received the event.
    async fn publish(&self, event: ClusterEvent) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// Answers point-to-point requests addressed to a node.
#[async_trait]
pub trait SnapshotResponder: Send + Sync {
    /// Handle an encoded request from `from` and return the encoded reply.
    async fn handle_request(&self, from: &NodeId, payload: Vec<u8>) -> Result<Vec<u8>, BusError>;
}

/// Joined nodes, shared with every subscription.
pub(crate) type PeerDirectory = Arc<RwLock<HashMap<NodeId, PeerEntry>>>;

/// Directory entry for a joined node.
pub(crate) struct PeerEntry {
    /// Held weakly: the responder usually owns a transport that owns the bus.
    responder: Weak<dyn SnapshotResponder>,
    pub(crate) reachable: bool,
}

/// In-memory cluster bus.
///
/// Uses `tokio::sync::broadcast` for frame fan-out. Every node of an
/// in-process cluster shares one bus; reachability toggles simulate network
/// partitions.
pub struct InMemoryClusterBus {
    /// Broadcast sender for events.
    sender: broadcast::Sender<ClusterEvent>,

    /// Joined nodes.
    peers: PeerDirectory,

    /// Total events published.
    events_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryClusterBus {
    /// Create a new bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Register a node and the responder answering its requests, then
    /// announce it to the cluster.
    pub fn join<R: SnapshotResponder + 'static>(&self, node: NodeId, responder: &Arc<R>) {
        let weak: Weak<R> = Arc::downgrade(responder);
        let responder: Weak<dyn SnapshotResponder> = weak;
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(
                node.clone(),
                PeerEntry {
                    responder,
                    reachable: true,
                },
            );
        }
        info!(node = %node, "Node joined cluster bus");
        self.send(ClusterEvent::NodeJoined(node));
    }

    /// Remove a node and announce its departure.
    pub fn leave(&self, node: &NodeId) {
        let removed = self
            .peers
            .write()
            .map(|mut peers| peers.remove(node).is_some())
            .unwrap_or(false);
        if removed {
            info!(node = %node, "Node left cluster bus");
            self.send(ClusterEvent::NodeLeft(node.clone()));
        }
    }

    /// Cut a node off from the bus, or reconnect it.
    ///
    /// An unreachable node neither sends nor receives frames, and requests to
    /// or from it fail with `PeerUnreachable`.
    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(entry) = peers.get_mut(node) {
                entry.reachable = reachable;
                info!(node = %node, reachable, "Node reachability changed");
            }
        }
    }

    /// Whether a joined node is currently reachable.
    #[must_use]
    pub fn is_reachable(&self, node: &NodeId) -> bool {
        self.peers
            .read()
            .map(|peers| peers.get(node).is_some_and(|entry| entry.reachable))
            .unwrap_or(false)
    }

    /// Reachable nodes other than `node`, sorted. Empty when `node` itself is
    /// cut off.
    #[must_use]
    pub fn peers_of(&self, node: &NodeId) -> Vec<NodeId> {
        let Ok(peers) = self.peers.read() else {
            return Vec::new();
        };
        if !peers.get(node).is_some_and(|entry| entry.reachable) {
            return Vec::new();
        }
        let mut reachable: Vec<NodeId> = peers
            .iter()
            .filter(|(id, entry)| *id != node && entry.reachable)
            .map(|(id, _)| id.clone())
            .collect();
        reachable.sort();
        reachable
    }

    /// Send a request from one node to another and await the reply.
    pub async fn request(&self, from: &NodeId, to: &NodeId, payload: Vec<u8>) -> Result<Vec<u8>, BusError> {
        let responder = {
            let peers = self.peers.read().map_err(|_| BusError::Closed)?;
            if !peers.get(from).is_some_and(|entry| entry.reachable) {
                return Err(BusError::PeerUnreachable(from.clone()));
            }
            let entry = peers.get(to).ok_or_else(|| BusError::UnknownPeer(to.clone()))?;
            if !entry.reachable {
                return Err(BusError::PeerUnreachable(to.clone()));
            }
            entry
                .responder
                .upgrade()
                .ok_or_else(|| BusError::UnknownPeer(to.clone()))?
        };

        debug!(from = %from, to = %to, bytes = payload.len(), "Routing request");
        responder.handle_request(from, payload).await
    }

    /// Subscribe a node to events matching a filter.
    ///
    /// The subscription never yields the node's own frames.
    #[must_use]
    pub fn subscribe(&self, node: NodeId, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        debug!(node = %node, topics = ?filter.topics, "New subscription created");
        Subscription::new(receiver, node, filter, Arc::clone(&self.peers))
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn send(&self, event: ClusterEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        let topic = event.topic();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(topic = ?topic, receivers, "Event published");
                receivers
            }
            Err(_) => {
                debug!(topic = ?topic, "Event dropped (no receivers)");
                0
            }
        }
    }
}

impl Default for InMemoryClusterBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryClusterBus {
    async fn publish(&self, event: ClusterEvent) -> usize {
        if let ClusterEvent::Frame { origin, .. } = &event {
            if !self.is_reachable(origin) {
                warn!(origin = %origin, "Frame dropped (origin unreachable)");
                return 0;
            }
        }
        self.send(event)
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
