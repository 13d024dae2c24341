//! # Event Subscriber
//!
//! Receiving side of the cluster bus.

use crate::events::{ClusterEvent, EventFilter};
use crate::publisher::PeerDirectory;
use shared_types::NodeId;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The bus was closed.
    #[error("Cluster bus closed")]
    Closed,
}

/// A node's subscription to the bus.
///
/// Events reaching the node while it is unreachable are discarded, as on a
/// partitioned network. Events lost to a lagging receiver are counted so the
/// owner can resynchronise.
pub struct Subscription {
    /// The broadcast receiver.
    receiver: broadcast::Receiver<ClusterEvent>,

    /// Node owning this subscription.
    node: NodeId,

    /// Filter for this subscription.
    filter: EventFilter,

    /// Directory consulted for the node's reachability.
    peers: PeerDirectory,

    /// Events lost since the last `take_missed`.
    missed: u64,
}

impl Subscription {
    /// Create a new subscription.
    pub(crate) fn new(
        receiver: broadcast::Receiver<ClusterEvent>,
        node: NodeId,
        filter: EventFilter,
        peers: PeerDirectory,
    ) -> Self {
        Self {
            receiver,
            node,
            filter,
            peers,
            missed: 0,
        }
    }

    /// Receive the next event accepted by this subscription.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next accepted event
    /// - `None` - The channel was closed (bus dropped)
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(node = %self.node, lagged = count, "Subscriber lagged, events dropped");
                    self.missed += count;
                    continue;
                }
            };

            if self.accepts(&event) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next event without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was available and accepted
    /// - `Ok(None)` - No event available (would block)
    /// - `Err(SubscriptionError::Closed)` - The channel was closed
    pub fn try_recv(&mut self) -> Result<Option<ClusterEvent>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.missed += count;
                    continue;
                }
            };

            if self.accepts(&event) {
                return Ok(Some(event));
            }
        }
    }

    /// Number of events lost to lag since the previous call, resetting the count.
    pub fn take_missed(&mut self) -> u64 {
        std::mem::take(&mut self.missed)
    }

    /// Node owning this subscription.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn accepts(&self, event: &ClusterEvent) -> bool {
        if let ClusterEvent::Frame { origin, .. } = event {
            if *origin == self.node {
                return false;
            }
        }
        let reachable = self
            .peers
            .read()
            .map(|peers| peers.get(&self.node).map_or(true, |entry| entry.reachable))
            .unwrap_or(false);
        if !reachable {
            debug!(node = %self.node, topic = ?event.topic(), "Event discarded (node unreachable)");
            return false;
        }
        self.filter.matches(event)
    }
}
