//! Domain Layer
//!
//! Rooms and the outcomes of membership changes.

pub mod room;

pub use room::{MembershipChange, Room, SubscribeOutcome, UnsubscribeOutcome};
