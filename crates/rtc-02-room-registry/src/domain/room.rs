//! # Rooms
//!
//! A room is the set of subscribers sharing one compiled filter. Room ids are
//! derived from filter ids, so there is exactly one room per distinct filter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use shared_types::{ConnectionId, FilterId, NodeId, RoomId, Subscriber};

/// A room
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub filter_id: FilterId,
    subscribers: BTreeSet<Subscriber>,
}

impl Room {
    /// Create an empty room for a filter.
    pub fn new(filter_id: FilterId) -> Self {
        Self {
            id: RoomId::for_filter(&filter_id),
            filter_id,
            subscribers: BTreeSet::new(),
        }
    }

    /// Add a subscriber; false if already present.
    pub fn join(&mut self, subscriber: Subscriber) -> bool {
        self.subscribers.insert(subscriber)
    }

    /// Remove a subscriber; false if absent.
    pub fn leave(&mut self, subscriber: &Subscriber) -> bool {
        self.subscribers.remove(subscriber)
    }

    pub fn contains(&self, subscriber: &Subscriber) -> bool {
        self.subscribers.contains(subscriber)
    }

    pub fn subscribers(&self) -> &BTreeSet<Subscriber> {
        &self.subscribers
    }

    /// Connections held by one node.
    pub fn members_of(&self, node: &NodeId) -> BTreeSet<ConnectionId> {
        self.subscribers
            .iter()
            .filter(|s| &s.node == node)
            .map(|s| s.connection.clone())
            .collect()
    }

    /// Drop every connection of a node; returns how many left.
    pub fn evict_node(&mut self, node: &NodeId) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| &s.node != node);
        before - self.subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Result of a subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub room_id: RoomId,
    pub filter_id: FilterId,
    /// False when the subscriber was already in the room
    pub subscribed: bool,
    /// True when this subscription created the room
    pub room_created: bool,
}

/// Result of an unsubscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// The subscriber left; `room_destroyed` when it was the last one
    Removed { room_destroyed: bool },
    /// The room exists but the subscriber was not in it
    NotSubscribed,
    /// The room does not exist (duplicate unsubscribe)
    UnknownRoom,
}

/// Result of replacing one node's members of a room
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: BTreeSet<ConnectionId>,
    pub removed: BTreeSet<ConnectionId>,
    pub room_created: bool,
    pub room_destroyed: bool,
}

impl MembershipChange {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
