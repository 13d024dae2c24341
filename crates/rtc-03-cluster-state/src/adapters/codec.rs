//! # Wire Codec
//!
//! Frame layout:
//!
//! ```text
//! +--------+----------+------------------------------+
//! | "RTCM" | u16 (BE) | bincode(ClusterMessage)      |
//! | magic  | version  | payload                      |
//! +--------+----------+------------------------------+
//! ```
//!
//! Filter bodies travel as canonical JSON text inside the payload, so the
//! bincode schema never carries self-describing values.

use shared_bus::PROTOCOL_VERSION;

use crate::domain::{ClusterError, ClusterMessage};

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"RTCM";

const HEADER_LEN: usize = MAGIC.len() + 2;

/// Encode a message into a frame.
pub fn encode(message: &ClusterMessage) -> Result<Vec<u8>, ClusterError> {
    let payload = bincode::serialize(message).map_err(|e| ClusterError::Codec(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame, rejecting foreign or future protocol versions.
pub fn decode(frame: &[u8]) -> Result<ClusterMessage, ClusterError> {
    if frame.len() < HEADER_LEN {
        return Err(ClusterError::Codec(format!("truncated frame ({} bytes)", frame.len())));
    }
    if frame[..MAGIC.len()] != MAGIC {
        return Err(ClusterError::Codec("bad magic".to_string()));
    }
    let version = u16::from_be_bytes([frame[4], frame[5]]);
    if version != PROTOCOL_VERSION {
        return Err(ClusterError::Codec(format!(
            "unsupported protocol version {version} (expected {PROTOCOL_VERSION})"
        )));
    }
    bincode::deserialize(&frame[HEADER_LEN..]).map_err(|e| ClusterError::Codec(e.to_string()))
}
