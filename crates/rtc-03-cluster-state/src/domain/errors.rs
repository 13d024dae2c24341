//! # Domain Errors
//!
//! Error types for the Cluster State subsystem.

use rtc_01_filter_engine::FilterError;
use shared_types::{NodeState, RoomId};
use thiserror::Error;

use super::value_objects::ResourceState;

/// Cluster state error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// The filter body could not be compiled.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Another operation holds the resource lock (try-once mode).
    #[error("Resource {resource} is busy ({held:?})")]
    ResourceBusy {
        /// Contended resource
        resource: RoomId,
        /// State the current holder put it in
        held: ResourceState,
    },

    /// The lock was not granted before the caller's deadline.
    #[error("Lock on {resource} not acquired after {waited_ms}ms")]
    LockTimeout {
        /// Contended resource
        resource: RoomId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// A resync took the lock over while the operation was in flight.
    #[error("Lock on {resource} was preempted by a resync")]
    LockPreempted {
        /// Resource whose lock was taken over
        resource: RoomId,
    },

    /// Peer state could not be applied consistently.
    #[error("Cluster desync on {resource}: {reason}")]
    ClusterDesync {
        /// Resource whose state disagrees
        resource: RoomId,
        /// What disagreed
        reason: String,
    },

    /// Subscription traffic arrived before the initial sync finished.
    #[error("Node not ready ({state:?})")]
    NotReady {
        /// Current node state
        state: NodeState,
    },

    /// Peer could not be reached or did not answer in time.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Configuration error.
    #[error("Invalid cluster configuration: {0}")]
    InvalidConfig(String),
}

impl ClusterError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceBusy { .. }
                | Self::LockTimeout { .. }
                | Self::LockPreempted { .. }
                | Self::ClusterDesync { .. }
                | Self::NotReady { .. }
                | Self::Transport(_)
        )
    }

    pub(crate) fn desync(resource: &RoomId, reason: impl Into<String>) -> Self {
        Self::ClusterDesync {
            resource: resource.clone(),
            reason: reason.into(),
        }
    }
}
