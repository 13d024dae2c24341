//! # Adapters Layer
//!
//! Wire codec, the bus-backed transport and the inbound bus adapter.

pub mod bus_adapter;
pub mod bus_transport;
pub mod codec;

pub use bus_adapter::{join_bus, ClusterBusAdapter};
pub use bus_transport::BusClusterTransport;
