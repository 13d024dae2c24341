//! # Shared Types Crate
//!
//! Identifiers and small value types shared by the filter engine, the room
//! registry and the cluster state manager.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every id that crosses a crate boundary is defined here.
//! - **Content-addressed filters**: a `FilterId` is derived from the canonical filter
//!   body, so two nodes compiling the same body agree on the id without coordination.
//! - **Rooms follow filters**: one room per distinct filter, `RoomId` derives from `FilterId`.

pub mod entities;

pub use entities::*;
