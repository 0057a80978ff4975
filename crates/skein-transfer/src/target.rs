//! Transfer targets — the receiving side of a transfer.
//!
//! A target is created by the local caller before the TransferRequest goes
//! out, receives its size from the TransferInfo answer, and then consumes
//! packets in strictly increasing packet-id order — the reordering buffer
//! lives in the channel, not here. `data_in` is only ever called with the
//! next expected packet.

use bytes::Bytes;

use skein_core::params::{FileTargetParams, VFileTargetParams};
use skein_core::{AssetId, AssetKind, SourceKind, TargetKind, TransferId, TransferStatus, WireError};

use crate::message::TransferCtx;

/// One-shot completion notifier. Consuming `FnOnce` makes "fires exactly
/// once" a property of the type rather than a convention.
pub type CompletionNotify = Box<dyn FnOnce(TransferStatus)>;

/// A packet that arrived before its predecessors and is parked until the
/// sequence catches up.
#[derive(Debug, Clone)]
pub struct DelayedPacket {
    pub packet_id: i32,
    pub status: TransferStatus,
    pub data: Bytes,
}

/// The receiving side of one transfer.
///
/// Lifecycle contract: `apply_params` → `set_info` → zero or more
/// `data_in` calls in packet-id order → exactly one
/// `completion_callback`, after which the object is dropped.
pub trait TransferTarget {
    fn id(&self) -> TransferId;
    fn kind(&self) -> TargetKind;

    /// The source kind this target expects to be fed from.
    fn source_kind(&self) -> SourceKind;

    fn got_info(&self) -> bool;

    /// Record the total size from TransferInfo and mark info as known.
    fn set_info(&mut self, size: u64);

    fn size(&self) -> u64;

    fn last_packet_id(&self) -> i32;
    fn set_last_packet_id(&mut self, packet_id: i32);

    fn next_packet_id(&self) -> i32 {
        self.last_packet_id() + 1
    }

    /// Configure the destination from the TransferInfo parameter payload.
    fn apply_params(&mut self, params: &[u8]) -> Result<(), WireError>;

    /// Consume the next in-order chunk. Returns Ok to keep going; any
    /// terminal status ends the transfer.
    fn data_in(&mut self, ctx: &mut TransferCtx, packet_id: i32, data: &[u8]) -> TransferStatus;

    /// Invoked exactly once, whatever the outcome, right before the
    /// target is dropped. Writes are finalized here.
    fn completion_callback(&mut self, ctx: &mut TransferCtx, status: TransferStatus);
}

// ── Store-backed target ───────────────────────────────────────────────────────

/// Accumulates chunks in memory and writes the whole object into the
/// local store when the transfer finishes cleanly.
pub struct VFileTarget {
    id: TransferId,
    asset_id: AssetId,
    asset_kind: AssetKind,
    source_kind: SourceKind,
    got_info: bool,
    size: u64,
    last_packet_id: i32,
    buffer: Vec<u8>,
    notify: Option<CompletionNotify>,
}

impl VFileTarget {
    pub fn new(id: TransferId, asset_id: AssetId, asset_kind: AssetKind) -> Self {
        Self {
            id,
            asset_id,
            asset_kind,
            source_kind: SourceKind::Asset,
            got_info: false,
            size: 0,
            last_packet_id: -1,
            buffer: Vec::new(),
            notify: None,
        }
    }

    /// Attach a one-shot completion notifier.
    pub fn with_notify(mut self, notify: CompletionNotify) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn params(&self) -> VFileTargetParams {
        VFileTargetParams {
            asset_id: self.asset_id,
            kind: self.asset_kind,
        }
    }
}

impl TransferTarget for VFileTarget {
    fn id(&self) -> TransferId {
        self.id
    }

    fn kind(&self) -> TargetKind {
        TargetKind::VFile
    }

    fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    fn got_info(&self) -> bool {
        self.got_info
    }

    fn set_info(&mut self, size: u64) {
        self.size = size;
        self.got_info = true;
        self.buffer.reserve(size as usize);
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_packet_id(&self) -> i32 {
        self.last_packet_id
    }

    fn set_last_packet_id(&mut self, packet_id: i32) {
        self.last_packet_id = packet_id;
    }

    fn apply_params(&mut self, params: &[u8]) -> Result<(), WireError> {
        if params.is_empty() {
            return Ok(());
        }
        let params = VFileTargetParams::from_blob(params)?;
        self.asset_id = params.asset_id;
        self.asset_kind = params.kind;
        Ok(())
    }

    fn data_in(&mut self, _ctx: &mut TransferCtx, _packet_id: i32, data: &[u8]) -> TransferStatus {
        self.buffer.extend_from_slice(data);
        TransferStatus::Ok
    }

    fn completion_callback(&mut self, ctx: &mut TransferCtx, status: TransferStatus) {
        let mut outcome = status;
        if status == TransferStatus::Done {
            if let Err(error) =
                ctx.store
                    .write(self.asset_id, self.asset_kind, &self.buffer)
            {
                tracing::warn!(
                    transfer_id = %self.id,
                    asset_id = %self.asset_id,
                    %error,
                    "failed to store completed transfer"
                );
                outcome = TransferStatus::Error;
            }
        }
        tracing::debug!(
            transfer_id = %self.id,
            asset_id = %self.asset_id,
            kind = self.asset_kind.as_str(),
            ?outcome,
            bytes = self.buffer.len(),
            "vfile target complete"
        );
        if let Some(notify) = self.notify.take() {
            notify(outcome);
        }
    }
}

// ── Filesystem target ─────────────────────────────────────────────────────────

/// Accumulates chunks in memory and writes them to a plain file when the
/// transfer finishes cleanly. The write is atomic: temp file, then rename.
pub struct FileTarget {
    id: TransferId,
    path: std::path::PathBuf,
    source_kind: SourceKind,
    got_info: bool,
    size: u64,
    last_packet_id: i32,
    buffer: Vec<u8>,
    notify: Option<CompletionNotify>,
}

impl FileTarget {
    pub fn new(id: TransferId, path: impl Into<std::path::PathBuf>, source_kind: SourceKind) -> Self {
        Self {
            id,
            path: path.into(),
            source_kind,
            got_info: false,
            size: 0,
            last_packet_id: -1,
            buffer: Vec::new(),
            notify: None,
        }
    }

    pub fn with_notify(mut self, notify: CompletionNotify) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn params(&self) -> FileTargetParams {
        FileTargetParams {
            path: self.path.clone(),
        }
    }

    fn write_atomic(&self) -> std::io::Result<()> {
        let tmp_path = self.path.with_extension("part");
        std::fs::write(&tmp_path, &self.buffer)?;
        std::fs::rename(&tmp_path, &self.path)
    }
}

impl TransferTarget for FileTarget {
    fn id(&self) -> TransferId {
        self.id
    }

    fn kind(&self) -> TargetKind {
        TargetKind::File
    }

    fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    fn got_info(&self) -> bool {
        self.got_info
    }

    fn set_info(&mut self, size: u64) {
        self.size = size;
        self.got_info = true;
        self.buffer.reserve(size as usize);
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_packet_id(&self) -> i32 {
        self.last_packet_id
    }

    fn set_last_packet_id(&mut self, packet_id: i32) {
        self.last_packet_id = packet_id;
    }

    fn apply_params(&mut self, params: &[u8]) -> Result<(), WireError> {
        if params.is_empty() {
            return Ok(());
        }
        let params = FileTargetParams::from_blob(params)?;
        self.path = params.path;
        Ok(())
    }

    fn data_in(&mut self, _ctx: &mut TransferCtx, _packet_id: i32, data: &[u8]) -> TransferStatus {
        self.buffer.extend_from_slice(data);
        TransferStatus::Ok
    }

    fn completion_callback(&mut self, _ctx: &mut TransferCtx, status: TransferStatus) {
        let mut outcome = status;
        if status == TransferStatus::Done {
            if let Err(error) = self.write_atomic() {
                tracing::warn!(
                    transfer_id = %self.id,
                    path = %self.path.display(),
                    %error,
                    "failed to write completed transfer"
                );
                outcome = TransferStatus::Error;
            }
        }
        if let Some(notify) = self.notify.take() {
            notify(outcome);
        }
    }
}
