//! # Cluster Events
//!
//! Everything that travels over the cluster bus: opaque frames broadcast by a
//! node, and membership changes announced by the bus itself.

use serde::{Deserialize, Serialize};
use shared_types::NodeId;
use thiserror::Error;

/// An event delivered to every node subscribed to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// An encoded message broadcast by `origin`.
    Frame {
        /// Node that broadcast the frame.
        origin: NodeId,
        /// Encoded payload, opaque to the bus.
        payload: Vec<u8>,
    },
    /// A node joined the bus.
    NodeJoined(NodeId),
    /// A node left the bus.
    NodeLeft(NodeId),
}

impl ClusterEvent {
    /// Get the topic for this event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Frame { .. } => EventTopic::Frames,
            Self::NodeJoined(_) | Self::NodeLeft(_) => EventTopic::Membership,
        }
    }

    /// Node the event is about (frame origin, or the joining/leaving node).
    #[must_use]
    pub fn node(&self) -> &NodeId {
        match self {
            Self::Frame { origin, .. } => origin,
            Self::NodeJoined(node) | Self::NodeLeft(node) => node,
        }
    }
}

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Frames broadcast by nodes.
    Frames,
    /// Join/leave announcements.
    Membership,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Nodes to include. Empty means every node.
    pub nodes: Vec<NodeId>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            nodes: Vec::new(),
        }
    }

    /// Create a filter for events about specific nodes.
    #[must_use]
    pub fn from_nodes(nodes: Vec<NodeId>) -> Self {
        Self {
            topics: Vec::new(),
            nodes,
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &ClusterEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let node_match = self.nodes.is_empty() || self.nodes.contains(event.node());

        topic_match && node_match
    }
}

/// Errors raised while routing a request between nodes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Either side of the request is cut off from the bus.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(NodeId),

    /// No node with this id has joined the bus.
    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// The remote responder failed to produce a reply.
    #[error("Responder failed: {0}")]
    Responder(String),

    /// The bus was closed.
    #[error("Cluster bus closed")]
    Closed,
}
