//! Inbound Ports (Driving Ports)

use std::collections::BTreeSet;

use shared_types::{Document, FilterId, RoomId, Subscriber};

use crate::domain::{SubscribeOutcome, UnsubscribeOutcome};
use crate::error::RegistryError;

/// Room registry API (Driving Port)
pub trait RoomRegistryApi: Send + Sync {
    /// Join the room of a filter, creating room and filter as needed.
    ///
    /// Structurally identical bodies resolve to the same room.
    fn subscribe(&self, body: &Document, subscriber: Subscriber) -> Result<SubscribeOutcome, RegistryError>;

    /// Leave a room. The last subscriber leaving tears down the room and,
    /// when no other reference remains, the compiled filter.
    fn unsubscribe(&self, room_id: &RoomId, subscriber: &Subscriber) -> UnsubscribeOutcome;

    /// Rooms serving the given filters.
    fn rooms_for(&self, filter_ids: &BTreeSet<FilterId>) -> BTreeSet<RoomId>;

    /// Rooms whose filter matches the document.
    fn test_document(&self, document: &Document) -> BTreeSet<RoomId>;
}
