//! Transfer status codes.
//!
//! Every TransferInfo and TransferPacket message carries one of these, and
//! every completion callback receives the terminal one. The distinction
//! between `UnknownSource` and `Error` matters to callers: the former is
//! "the peer has no such content", the latter is "something broke".

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Outcome code for a transfer operation, on the wire as an i32.
///
/// `Ok` and `Skip` are non-terminal; everything else ends the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum TransferStatus {
    /// More data follows.
    Ok = 0,
    /// Normal terminal success. May ride with the final data chunk.
    Done = 1,
    /// Transient "not ready" — the source has nothing to send this tick.
    /// Never sent on the wire.
    Skip = 2,
    /// Cooperative cancellation, local or peer-initiated.
    Abort = -1,
    /// Unrecoverable failure for this transfer.
    Error = -2,
    /// The peer has no such content.
    UnknownSource = -3,
    InsufficientPermissions = -4,
    /// The request outlived its absolute timeout.
    Timeout = -5,
    /// The connection to the peer is gone.
    CircuitGone = -6,
}

impl TransferStatus {
    /// True for every code that ends a transfer. `Ok` and `Skip` are the
    /// only non-terminal codes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Ok | TransferStatus::Skip)
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for TransferStatus {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, WireError> {
        match value {
            0 => Ok(TransferStatus::Ok),
            1 => Ok(TransferStatus::Done),
            2 => Ok(TransferStatus::Skip),
            -1 => Ok(TransferStatus::Abort),
            -2 => Ok(TransferStatus::Error),
            -3 => Ok(TransferStatus::UnknownSource),
            -4 => Ok(TransferStatus::InsufficientPermissions),
            -5 => Ok(TransferStatus::Timeout),
            -6 => Ok(TransferStatus::CircuitGone),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}
