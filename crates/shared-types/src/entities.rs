//! # Core Entities
//!
//! Identifier newtypes and the node lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A document tested against registered filters.
///
/// Documents are plain JSON objects; nested objects are addressed with
/// dotted field paths (`"address.city"`).
pub type Document = serde_json::Value;

/// Identifier of a compiled filter.
///
/// Lowercase hex digest of the canonical filter body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterId(String);

impl FilterId {
    /// Wrap an already computed digest.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a room (set of subscribers sharing one filter).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a raw room id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The room serving a given filter.
    pub fn for_filter(filter_id: &FilterId) -> Self {
        Self(filter_id.as_str().to_string())
    }

    /// The filter a room serves.
    pub fn filter_id(&self) -> FilterId {
        FilterId(self.0.clone())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a configured node name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a client connection, unique on the node that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap a transport-assigned connection id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A room member: a connection qualified by the node holding it.
///
/// Remote members are mirrored into every node's registry so that any node
/// can resolve which rooms a document matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscriber {
    /// Node owning the connection.
    pub node: NodeId,
    /// Connection on that node.
    pub connection: ConnectionId,
}

impl Subscriber {
    /// Create a subscriber handle.
    pub fn new(node: NodeId, connection: ConnectionId) -> Self {
        Self { node, connection }
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.connection)
    }
}

/// Node operational states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Started, not yet synchronised with the cluster.
    #[default]
    Joining,
    /// Pulling the cluster snapshot.
    Syncing,
    /// Serving subscription traffic.
    Running,
}

impl NodeState {
    /// Whether subscription traffic may be served.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Running)
    }
}
