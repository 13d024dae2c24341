//! # Domain Layer
//!
//! Pure cluster state types, no I/O.

pub mod entities;
pub mod errors;
pub mod value_objects;

pub use entities::{
    ClusterDelta, ClusterMessage, DeltaOutcome, FilterRegistration, ResourceRecord,
    ResourceVersion, SyncKind, SyncReport,
};
pub use errors::ClusterError;
pub use value_objects::{LockMode, ResourceState, Slot, Version};
