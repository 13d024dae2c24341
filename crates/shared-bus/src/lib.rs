//! # Shared Bus - Cluster Bus for Inter-Node Communication
//!
//! Carries the cluster state manager's traffic between the nodes of an
//! in-process cluster.
//!
//! ## Two channels
//!
//! ```text
//! ┌──────────┐  publish(Frame)   ┌──────────────┐  subscribe()  ┌──────────┐
//! │  Node A  │ ────────────────► │  Cluster Bus │ ────────────► │  Node B  │
//! │          │                   │              │               │          │
//! │          │  request(A, B)    │  peer        │ handle_request│          │
//! │          │ ────────────────► │  directory   │ ────────────► │          │
//! └──────────┘                   └──────────────┘               └──────────┘
//! ```
//!
//! - **Broadcast:** deltas fan out to every other reachable node.
//! - **Request/reply:** version listings and snapshots are pulled from a
//!   single peer through its registered `SnapshotResponder`.
//!
//! Payloads are opaque bytes; encoding belongs to the sender.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{BusError, ClusterEvent, EventFilter, EventTopic};
pub use publisher::{EventPublisher, InMemoryClusterBus, SnapshotResponder};
pub use subscriber::{Subscription, SubscriptionError};

/// Current protocol version for cluster frames.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum events to buffer per subscriber before it lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
