//! Error types for the Room Registry subsystem

use rtc_01_filter_engine::FilterError;
use shared_types::RoomId;
use thiserror::Error;

/// Errors raised by the room registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The filter body could not be compiled.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The room does not exist.
    #[error("Unknown room: {0}")]
    UnknownRoom(RoomId),
}
