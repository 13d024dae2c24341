//! # Service Layer
//!
//! Orchestration of locking, local mutation, replication and resync.

mod cluster_state_manager;

pub use cluster_state_manager::ClusterStateManager;
