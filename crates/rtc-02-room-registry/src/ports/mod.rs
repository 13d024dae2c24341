//! Ports Layer
//!
//! Driving port of the room registry, called by the transport layer and by
//! the cluster state manager.

pub mod inbound;

pub use inbound::RoomRegistryApi;
