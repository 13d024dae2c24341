//! # Integration Tests
//!
//! - `flows`: single-node subscribe, match and teardown through the registry
//! - `cluster`: multi-node replication over the cluster bus

pub mod cluster;
pub mod flows;
