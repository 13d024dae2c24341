//! # RTC-02 Room Registry
//!
//! Bidirectional mapping between compiled filters and subscriber rooms.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): `Room` and membership outcomes
//! - **Ports Layer** (`ports/`): `RoomRegistryApi` driving port
//! - **Service Layer** (`service/`): `RoomRegistry`, which owns the filter
//!   engine and the rooms behind one reader/writer lock
//!
//! ## Invariants
//!
//! - One room per distinct filter; the room id is derived from the filter id
//! - A room exists iff it has at least one subscriber
//! - Destroying a room releases its filter; the last release removes every
//!   condition of the filter from the field index
//! - A matching pass never observes a partially applied teardown
//!
//! ## Usage Example
//!
//! ```ignore
//! use rtc_02_room_registry::{RoomRegistry, RoomRegistryApi};
//!
//! let registry = RoomRegistry::with_defaults();
//! let outcome = registry.subscribe(&json!({"term": {"city": "NYC"}}), subscriber)?;
//! let rooms = registry.test_document(&json!({"city": "NYC"}));
//! assert!(rooms.contains(&outcome.room_id));
//! ```

pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use domain::{MembershipChange, Room, SubscribeOutcome, UnsubscribeOutcome};
pub use error::RegistryError;
pub use ports::RoomRegistryApi;
pub use service::RoomRegistry;
