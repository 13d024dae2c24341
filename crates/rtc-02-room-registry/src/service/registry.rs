//! Room Registry
//!
//! Rooms and the filter engine share one reader/writer lock:
//!
//! - subscriptions, unsubscriptions and teardown cascades take the write lock
//!   for their whole duration;
//! - matching passes take the read lock.
//!
//! A pass therefore sees every filter either fully indexed or fully absent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rtc_01_filter_engine::{
    EngineConfig, EngineMetrics, FilterEngine, FilterEngineApi, FilterError, NormalizedFilter,
};
use shared_types::{ConnectionId, Document, FilterId, NodeId, RoomId, Subscriber};
use tracing::{debug, info};

use crate::domain::{MembershipChange, Room, SubscribeOutcome, UnsubscribeOutcome};
use crate::error::RegistryError;
use crate::ports::RoomRegistryApi;

#[derive(Debug)]
struct RegistryState {
    engine: FilterEngine,
    rooms: HashMap<RoomId, Room>,
}

impl RegistryState {
    /// Create the room for a compiled filter, registering the filter.
    fn open_room(&mut self, filter: &NormalizedFilter) -> &mut Room {
        let room_id = RoomId::for_filter(&filter.id);
        if !self.rooms.contains_key(&room_id) {
            self.engine.register_normalized(filter);
            info!(room_id = %room_id, "Room created");
        }
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Room::new(filter.id.clone()))
    }

    /// Tear down an empty room and release its filter.
    fn close_room(&mut self, room_id: &RoomId) {
        if let Some(room) = self.rooms.remove(room_id) {
            self.engine.release(&room.filter_id);
            info!(room_id = %room_id, "Room destroyed");
        }
    }
}

/// The room registry
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl RoomRegistry {
    pub fn new(config: EngineConfig) -> Result<Self, RegistryError> {
        let engine = FilterEngine::new(config.clone())?;
        Ok(Self::with_engine(engine))
    }

    pub fn with_defaults() -> Self {
        Self::with_engine(FilterEngine::with_defaults())
    }

    fn with_engine(engine: FilterEngine) -> Self {
        Self {
            config: engine.config().clone(),
            metrics: engine.metrics(),
            state: RwLock::new(RegistryState {
                engine,
                rooms: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine_metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Compile a body without registering it.
    pub fn compile(&self, body: &Document) -> Result<NormalizedFilter, FilterError> {
        self.state.read().engine.compile(body)
    }

    /// Subscribe with an already compiled filter.
    pub fn subscribe_normalized(&self, filter: &NormalizedFilter, subscriber: Subscriber) -> SubscribeOutcome {
        let mut state = self.state.write();
        let room_created = !state.rooms.contains_key(&RoomId::for_filter(&filter.id));
        let room = state.open_room(filter);
        let subscribed = room.join(subscriber.clone());
        let room_id = room.id.clone();

        debug!(room_id = %room_id, subscriber = %subscriber, subscribed, "Subscription processed");
        SubscribeOutcome {
            room_id,
            filter_id: filter.id.clone(),
            subscribed,
            room_created,
        }
    }

    /// Make `members` exactly the connections `node` holds in the room of
    /// `filter`, creating or destroying the room as needed. Used to mirror
    /// remote membership.
    pub fn set_node_members(
        &self,
        filter: &NormalizedFilter,
        node: &NodeId,
        members: &BTreeSet<ConnectionId>,
    ) -> MembershipChange {
        let room_id = RoomId::for_filter(&filter.id);
        let mut state = self.state.write();
        let current = state
            .rooms
            .get(&room_id)
            .map(|room| room.members_of(node))
            .unwrap_or_default();

        let mut change = MembershipChange {
            added: members.difference(&current).cloned().collect(),
            removed: current.difference(members).cloned().collect(),
            ..Default::default()
        };
        if change.is_noop() {
            return change;
        }

        if !change.added.is_empty() {
            change.room_created = !state.rooms.contains_key(&room_id);
            let room = state.open_room(filter);
            for connection in &change.added {
                room.join(Subscriber::new(node.clone(), connection.clone()));
            }
        }
        if let Some(room) = state.rooms.get_mut(&room_id) {
            for connection in &change.removed {
                room.leave(&Subscriber::new(node.clone(), connection.clone()));
            }
            if room.is_empty() {
                state.close_room(&room_id);
                change.room_destroyed = true;
            }
        }

        debug!(
            room_id = %room_id,
            node = %node,
            added = change.added.len(),
            removed = change.removed.len(),
            "Node membership replaced"
        );
        change
    }

    /// Leave every room a subscriber is in. Returns the rooms left.
    pub fn remove_subscriber(&self, subscriber: &Subscriber) -> BTreeSet<RoomId> {
        let mut state = self.state.write();
        let joined: BTreeSet<RoomId> = state
            .rooms
            .values()
            .filter(|room| room.contains(subscriber))
            .map(|room| room.id.clone())
            .collect();

        for room_id in &joined {
            let emptied = state.rooms.get_mut(room_id).is_some_and(|room| {
                room.leave(subscriber);
                room.is_empty()
            });
            if emptied {
                state.close_room(room_id);
            }
        }
        if !joined.is_empty() {
            debug!(subscriber = %subscriber, rooms = joined.len(), "Subscriber removed from all rooms");
        }
        joined
    }

    /// Rooms a subscriber is currently in.
    pub fn rooms_of(&self, subscriber: &Subscriber) -> BTreeSet<RoomId> {
        self.state
            .read()
            .rooms
            .values()
            .filter(|room| room.contains(subscriber))
            .map(|room| room.id.clone())
            .collect()
    }

    /// Drop every subscriber held by a node. Returns the rooms touched.
    pub fn evict_node(&self, node: &NodeId) -> BTreeSet<RoomId> {
        let mut state = self.state.write();
        let mut touched = BTreeSet::new();
        let mut emptied = Vec::new();
        for room in state.rooms.values_mut() {
            if room.evict_node(node) > 0 {
                touched.insert(room.id.clone());
                if room.is_empty() {
                    emptied.push(room.id.clone());
                }
            }
        }
        for room_id in &emptied {
            state.close_room(room_id);
        }
        if !touched.is_empty() {
            info!(node = %node, rooms = touched.len(), "Node evicted from rooms");
        }
        touched
    }

    pub fn subscribers(&self, room_id: &RoomId) -> Result<BTreeSet<Subscriber>, RegistryError> {
        self.state
            .read()
            .rooms
            .get(room_id)
            .map(|room| room.subscribers().clone())
            .ok_or_else(|| RegistryError::UnknownRoom(room_id.clone()))
    }

    /// Connections a node holds in a room; empty for an unknown room.
    pub fn members_of(&self, room_id: &RoomId, node: &NodeId) -> BTreeSet<ConnectionId> {
        self.state
            .read()
            .rooms
            .get(room_id)
            .map(|room| room.members_of(node))
            .unwrap_or_default()
    }

    /// Canonical filter body served by a room.
    pub fn filter_body(&self, room_id: &RoomId) -> Result<String, RegistryError> {
        let state = self.state.read();
        let room = state
            .rooms
            .get(room_id)
            .ok_or_else(|| RegistryError::UnknownRoom(room_id.clone()))?;
        state
            .engine
            .canonical(&room.filter_id)
            .map(str::to_string)
            .ok_or_else(|| RegistryError::UnknownRoom(room_id.clone()))
    }

    pub fn contains_room(&self, room_id: &RoomId) -> bool {
        self.state.read().rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    pub fn room_ids(&self) -> BTreeSet<RoomId> {
        self.state.read().rooms.keys().cloned().collect()
    }

    /// Number of compiled filters held by the engine.
    pub fn filter_count(&self) -> usize {
        self.state.read().engine.filter_count()
    }

    /// Number of distinct conditions held by the engine.
    pub fn condition_count(&self) -> usize {
        self.state.read().engine.condition_count()
    }
}

impl RoomRegistryApi for RoomRegistry {
    fn subscribe(&self, body: &Document, subscriber: Subscriber) -> Result<SubscribeOutcome, RegistryError> {
        let filter = self.compile(body)?;
        Ok(self.subscribe_normalized(&filter, subscriber))
    }

    fn unsubscribe(&self, room_id: &RoomId, subscriber: &Subscriber) -> UnsubscribeOutcome {
        let mut state = self.state.write();
        let Some(room) = state.rooms.get_mut(room_id) else {
            debug!(room_id = %room_id, subscriber = %subscriber, "Unsubscribe from unknown room ignored");
            return UnsubscribeOutcome::UnknownRoom;
        };
        if !room.leave(subscriber) {
            return UnsubscribeOutcome::NotSubscribed;
        }

        let room_destroyed = room.is_empty();
        if room_destroyed {
            state.close_room(room_id);
        }
        debug!(room_id = %room_id, subscriber = %subscriber, room_destroyed, "Unsubscribed");
        UnsubscribeOutcome::Removed { room_destroyed }
    }

    fn rooms_for(&self, filter_ids: &BTreeSet<FilterId>) -> BTreeSet<RoomId> {
        let state = self.state.read();
        filter_ids
            .iter()
            .map(RoomId::for_filter)
            .filter(|room_id| state.rooms.contains_key(room_id))
            .collect()
    }

    fn test_document(&self, document: &Document) -> BTreeSet<RoomId> {
        let state = self.state.read();
        state
            .engine
            .test(document)
            .iter()
            .map(RoomId::for_filter)
            .filter(|room_id| state.rooms.contains_key(room_id))
            .collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
