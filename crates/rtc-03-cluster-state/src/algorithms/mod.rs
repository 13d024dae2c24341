//! # Algorithms Module
//!
//! Resource locking, replicated record reconciliation and tombstone
//! collection.

pub mod lock_manager;
pub mod reconcile;
pub mod record_store;

pub use lock_manager::{LockGuard, LockManager};
pub use reconcile::{is_newer, merge_record, write_own_slot, MergeOutcome};
pub use record_store::RecordStore;
