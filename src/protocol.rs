//! Length-framed message exchange between coordinator and workers.
//!
//! Frames are a little-endian `u32` payload length followed by a bincode
//! payload, written over the worker's stdio pipes. Frames are strictly
//! ordered per connection; any malformed frame is handled by the
//! coordinator exactly like a worker crash.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::mutant::{DetectionStatus, MutantDescriptor};

/// Upper bound on a single frame payload. A length prefix beyond this is
/// garbage, not a message, and fails fast instead of allocating.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO failure on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Declared frame length exceeds [`MAX_FRAME_LEN`].
    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(u32),
    /// Stream ended cleanly between frames.
    #[error("connection closed")]
    Closed,
}

impl ProtocolError {
    /// True when the peer went away between frames rather than
    /// mid-message.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Messages sent from the coordinator to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorRequest {
    /// Execute the given mutants, in order, and report each as resolved.
    DispatchUnit {
        /// Unit identifier, echoed back in [`WorkerReply::UnitComplete`].
        unit_id: u64,
        /// Members in dispatch order.
        mutants: Vec<MutantDescriptor>,
    },
    /// Finish the current loop and exit cleanly.
    Shutdown,
}

/// Messages sent from a worker to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerReply {
    /// One mutant reached a terminal status. Emitted immediately, never
    /// batched, so partial progress survives a later crash.
    MutantResult {
        /// Mutant identifier.
        mutant_id: u64,
        /// Terminal status.
        status: DetectionStatus,
        /// Optional free-form detail.
        detail: Option<String>,
    },
    /// Every mutant of the unit has been reported.
    UnitComplete {
        /// Unit identifier from the corresponding dispatch.
        unit_id: u64,
    },
    /// The worker hit a fault it could not attribute to a single mutant.
    WorkerError {
        /// Human-readable reason.
        reason: String,
    },
}

/// Write one length-framed message.
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let payload = bincode::serialize(message)?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-framed message.
///
/// Returns [`ProtocolError::Closed`] on EOF at a frame boundary; EOF in
/// the middle of a frame is an IO error like any other truncation.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, ProtocolError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed);
        }
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}
