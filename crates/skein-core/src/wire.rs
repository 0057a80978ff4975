//! skein wire format — on-wire types for the transfer protocol.
//!
//! Four messages make up the protocol: TransferRequest opens a flow,
//! TransferInfo answers it with a status and total size, TransferPacket
//! carries one chunk, TransferAbort cancels. Control messages ride the
//! substrate's reliable option; packets may arrive in any order and the
//! target layer reorders them.
//!
//! Fixed-field headers are #[repr(C, packed)] for deterministic layout and
//! use zerocopy derives for allocation-free serialization. Variable-size
//! parameter payloads ride behind the header as bounded JSON blobs. There
//! is no unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::id::TransferId;
use crate::status::TransferStatus;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum data bytes in one TransferPacket. Larger content is split by
/// the source across packets.
pub const MAX_PACKET_DATA_SIZE: usize = 2048;

/// Maximum size of a packed parameter payload.
pub const MAX_PARAMS_SIZE: usize = 1024;

/// Leading tag byte of each encoded message.
pub const MSG_TRANSFER_REQUEST: u8 = 1;
pub const MSG_TRANSFER_INFO: u8 = 2;
pub const MSG_TRANSFER_PACKET: u8 = 3;
pub const MSG_TRANSFER_ABORT: u8 = 4;

// ── Tags ──────────────────────────────────────────────────────────────────────

/// Traffic class of a transfer. Each (host, channel) pair owns its own
/// source/target channels and throttle accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelKind {
    Misc = 1,
    Asset = 2,
}

impl TryFrom<u8> for ChannelKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(ChannelKind::Misc),
            2 => Ok(ChannelKind::Asset),
            other => Err(WireError::UnknownChannel(other)),
        }
    }
}

/// What kind of source a TransferRequest asks the peer to instantiate.
/// `Asset` is built in; the rest are registered by the embedding
/// application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceKind {
    File = 1,
    Asset = 2,
    SimInvItem = 3,
    SimEstate = 4,
}

impl TryFrom<u8> for SourceKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(SourceKind::File),
            2 => Ok(SourceKind::Asset),
            3 => Ok(SourceKind::SimInvItem),
            4 => Ok(SourceKind::SimEstate),
            other => Err(WireError::UnknownSourceKind(other)),
        }
    }
}

/// Target flavor tag carried in TransferInfo. The source side does not
/// know what the requester will do with the data, so `Unknown` is the
/// common case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TargetKind {
    Unknown = 0,
    File = 1,
    VFile = 2,
}

impl TryFrom<u8> for TargetKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(TargetKind::Unknown),
            1 => Ok(TargetKind::File),
            2 => Ok(TargetKind::VFile),
            other => Err(WireError::UnknownTargetKind(other)),
        }
    }
}

// ── Packed headers ────────────────────────────────────────────────────────────

/// Header of a TransferRequest. Wire size: 26 bytes, followed by
/// `params_len` bytes of source parameters.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct TransferRequestHeader {
    pub transfer_id: [u8; 16],
    pub channel: u8,
    pub source_kind: u8,
    /// f32 priority as its IEEE-754 bit pattern.
    pub priority_bits: u32,
    pub params_len: u32,
}

assert_eq_size!(TransferRequestHeader, [u8; 26]);

/// Header of a TransferInfo. Wire size: 34 bytes, followed by
/// `params_len` bytes of target parameters.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct TransferInfoHeader {
    pub transfer_id: [u8; 16],
    pub channel: u8,
    pub target_kind: u8,
    pub status_code: i32,
    pub size: u64,
    pub params_len: u32,
}

assert_eq_size!(TransferInfoHeader, [u8; 34]);

/// Header of a TransferPacket. Wire size: 29 bytes, followed by
/// `data_len` bytes of chunk data.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct TransferPacketHeader {
    pub transfer_id: [u8; 16],
    pub channel: u8,
    pub packet_id: i32,
    pub status_code: i32,
    pub data_len: u32,
}

assert_eq_size!(TransferPacketHeader, [u8; 29]);

/// Header of a TransferAbort. Wire size: 17 bytes, no payload.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct TransferAbortHeader {
    pub transfer_id: [u8; 16],
    pub channel: u8,
}

assert_eq_size!(TransferAbortHeader, [u8; 17]);

// ── Message envelope ──────────────────────────────────────────────────────────

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferMessage {
    /// Ask the peer to instantiate a source and start sending.
    Request {
        transfer_id: TransferId,
        channel: ChannelKind,
        source_kind: SourceKind,
        priority: f32,
        params: Bytes,
    },
    /// Source's answer: status and total size. Non-Ok status tears the
    /// target down.
    Info {
        transfer_id: TransferId,
        channel: ChannelKind,
        target_kind: TargetKind,
        status: TransferStatus,
        size: u64,
        params: Bytes,
    },
    /// One chunk. The status rides with the data so the final chunk can
    /// carry Done (or an error) without an extra round trip.
    Packet {
        transfer_id: TransferId,
        channel: ChannelKind,
        packet_id: i32,
        status: TransferStatus,
        data: Bytes,
    },
    /// Unconditional cancellation, valid from either side.
    Abort {
        transfer_id: TransferId,
        channel: ChannelKind,
    },
}

impl TransferMessage {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferMessage::Request { transfer_id, .. }
            | TransferMessage::Info { transfer_id, .. }
            | TransferMessage::Packet { transfer_id, .. }
            | TransferMessage::Abort { transfer_id, .. } => *transfer_id,
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self {
            TransferMessage::Request { channel, .. }
            | TransferMessage::Info { channel, .. }
            | TransferMessage::Packet { channel, .. }
            | TransferMessage::Abort { channel, .. } => *channel,
        }
    }

    /// Encode to a datagram: one tag byte, the packed header, then the
    /// payload.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut out: Vec<u8>;
        match self {
            TransferMessage::Request {
                transfer_id,
                channel,
                source_kind,
                priority,
                params,
            } => {
                if params.len() > MAX_PARAMS_SIZE {
                    return Err(WireError::ParamsTooLarge(params.len()));
                }
                let header = TransferRequestHeader {
                    transfer_id: transfer_id.0,
                    channel: *channel as u8,
                    source_kind: *source_kind as u8,
                    priority_bits: priority.to_bits(),
                    params_len: params.len() as u32,
                };
                out = Vec::with_capacity(1 + 26 + params.len());
                out.push(MSG_TRANSFER_REQUEST);
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(params);
            }
            TransferMessage::Info {
                transfer_id,
                channel,
                target_kind,
                status,
                size,
                params,
            } => {
                if params.len() > MAX_PARAMS_SIZE {
                    return Err(WireError::ParamsTooLarge(params.len()));
                }
                let header = TransferInfoHeader {
                    transfer_id: transfer_id.0,
                    channel: *channel as u8,
                    target_kind: *target_kind as u8,
                    status_code: status.code(),
                    size: *size,
                    params_len: params.len() as u32,
                };
                out = Vec::with_capacity(1 + 34 + params.len());
                out.push(MSG_TRANSFER_INFO);
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(params);
            }
            TransferMessage::Packet {
                transfer_id,
                channel,
                packet_id,
                status,
                data,
            } => {
                if data.len() > MAX_PACKET_DATA_SIZE {
                    return Err(WireError::PacketTooLarge(data.len()));
                }
                let header = TransferPacketHeader {
                    transfer_id: transfer_id.0,
                    channel: *channel as u8,
                    packet_id: *packet_id,
                    status_code: status.code(),
                    data_len: data.len() as u32,
                };
                out = Vec::with_capacity(1 + 29 + data.len());
                out.push(MSG_TRANSFER_PACKET);
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(data);
            }
            TransferMessage::Abort {
                transfer_id,
                channel,
            } => {
                let header = TransferAbortHeader {
                    transfer_id: transfer_id.0,
                    channel: *channel as u8,
                };
                out = Vec::with_capacity(1 + 17);
                out.push(MSG_TRANSFER_ABORT);
                out.extend_from_slice(header.as_bytes());
            }
        }
        Ok(Bytes::from(out))
    }

    /// Decode one datagram. Rejects unknown tags, truncated input,
    /// oversized payloads, and trailing garbage.
    pub fn decode(input: &[u8]) -> Result<Self, WireError> {
        let (&tag, rest) = input.split_first().ok_or(WireError::Truncated)?;
        match tag {
            MSG_TRANSFER_REQUEST => {
                let header =
                    TransferRequestHeader::read_from_prefix(rest).ok_or(WireError::Truncated)?;
                let params_len = header.params_len as usize;
                if params_len > MAX_PARAMS_SIZE {
                    return Err(WireError::ParamsTooLarge(params_len));
                }
                let payload = rest.get(26..).ok_or(WireError::Truncated)?;
                if payload.len() != params_len {
                    return Err(WireError::LengthMismatch {
                        declared: params_len,
                        actual: payload.len(),
                    });
                }
                Ok(TransferMessage::Request {
                    transfer_id: TransferId(header.transfer_id),
                    channel: ChannelKind::try_from(header.channel)?,
                    source_kind: SourceKind::try_from(header.source_kind)?,
                    priority: f32::from_bits(header.priority_bits),
                    params: Bytes::copy_from_slice(payload),
                })
            }
            MSG_TRANSFER_INFO => {
                let header =
                    TransferInfoHeader::read_from_prefix(rest).ok_or(WireError::Truncated)?;
                let params_len = header.params_len as usize;
                if params_len > MAX_PARAMS_SIZE {
                    return Err(WireError::ParamsTooLarge(params_len));
                }
                let payload = rest.get(34..).ok_or(WireError::Truncated)?;
                if payload.len() != params_len {
                    return Err(WireError::LengthMismatch {
                        declared: params_len,
                        actual: payload.len(),
                    });
                }
                let status_code = header.status_code;
                let size = header.size;
                Ok(TransferMessage::Info {
                    transfer_id: TransferId(header.transfer_id),
                    channel: ChannelKind::try_from(header.channel)?,
                    target_kind: TargetKind::try_from(header.target_kind)?,
                    status: TransferStatus::try_from(status_code)?,
                    size,
                    params: Bytes::copy_from_slice(payload),
                })
            }
            MSG_TRANSFER_PACKET => {
                let header =
                    TransferPacketHeader::read_from_prefix(rest).ok_or(WireError::Truncated)?;
                let data_len = header.data_len as usize;
                if data_len > MAX_PACKET_DATA_SIZE {
                    return Err(WireError::PacketTooLarge(data_len));
                }
                let payload = rest.get(29..).ok_or(WireError::Truncated)?;
                if payload.len() != data_len {
                    return Err(WireError::LengthMismatch {
                        declared: data_len,
                        actual: payload.len(),
                    });
                }
                let packet_id = header.packet_id;
                let status_code = header.status_code;
                Ok(TransferMessage::Packet {
                    transfer_id: TransferId(header.transfer_id),
                    channel: ChannelKind::try_from(header.channel)?,
                    packet_id,
                    status: TransferStatus::try_from(status_code)?,
                    data: Bytes::copy_from_slice(payload),
                })
            }
            MSG_TRANSFER_ABORT => {
                let header =
                    TransferAbortHeader::read_from_prefix(rest).ok_or(WireError::Truncated)?;
                if rest.len() != 17 {
                    return Err(WireError::LengthMismatch {
                        declared: 17,
                        actual: rest.len(),
                    });
                }
                Ok(TransferMessage::Abort {
                    transfer_id: TransferId(header.transfer_id),
                    channel: ChannelKind::try_from(header.channel)?,
                })
            }
            other => Err(WireError::UnknownMessageTag(other)),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message tag: 0x{0:02x}")]
    UnknownMessageTag(u8),

    #[error("unknown channel byte: 0x{0:02x}")]
    UnknownChannel(u8),

    #[error("unknown source kind byte: 0x{0:02x}")]
    UnknownSourceKind(u8),

    #[error("unknown target kind byte: 0x{0:02x}")]
    UnknownTargetKind(u8),

    #[error("unknown asset kind byte: 0x{0:02x}")]
    UnknownAssetKind(u8),

    #[error("unknown status code: {0}")]
    UnknownStatus(i32),

    #[error("params payload {0} exceeds maximum {MAX_PARAMS_SIZE}")]
    ParamsTooLarge(usize),

    #[error("packet data {0} exceeds maximum {MAX_PACKET_DATA_SIZE}")]
    PacketTooLarge(usize),

    #[error("message truncated")]
    Truncated,

    #[error("payload length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("malformed params payload: {0}")]
    BadParams(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
