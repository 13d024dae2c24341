//! # Ports Layer
//!
//! Driving API and the transport the manager depends on.

pub mod inbound;
pub mod outbound;

pub use inbound::ClusterApi;
pub use outbound::{ClusterTransport, MockTransport};
