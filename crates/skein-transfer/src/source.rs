//! Transfer sources — the sending side of a transfer.
//!
//! A source is instantiated when a TransferRequest arrives, lives in its
//! channel's priority queue while it streams packets, and is destroyed
//! right after its completion callback fires. Sources are created through
//! a factory registry keyed by [`SourceKind`], so the embedding
//! application can add kinds beyond the built-in asset source.

use std::collections::HashMap;

use bytes::Bytes;

use skein_core::params::AssetSourceParams;
use skein_core::{AssetId, AssetKind, SourceKind, TransferId, TransferStatus, WireError};

use crate::message::TransferCtx;

/// One packet's worth of data from a source, with the status that rides
/// alongside it on the wire.
#[derive(Debug)]
pub struct SourceData {
    pub status: TransferStatus,
    pub data: Bytes,
}

impl SourceData {
    pub fn skip() -> Self {
        Self {
            status: TransferStatus::Skip,
            data: Bytes::new(),
        }
    }

    pub fn error(status: TransferStatus) -> Self {
        Self {
            status,
            data: Bytes::new(),
        }
    }
}

/// The sending side of one transfer.
///
/// Lifecycle contract: `apply_params` → `init_transfer` → zero or more
/// `data_callback` calls → exactly one `completion_callback`, after which
/// the object is dropped.
pub trait TransferSource {
    fn id(&self) -> TransferId;
    fn kind(&self) -> SourceKind;

    fn priority(&self) -> f32;
    fn set_priority(&mut self, priority: f32);

    /// Total size, known once the backing content has been resolved.
    fn size(&self) -> Option<u64>;

    fn last_packet_id(&self) -> i32;
    fn set_last_packet_id(&mut self, packet_id: i32);

    fn next_packet_id(&self) -> i32 {
        self.last_packet_id() + 1
    }

    /// Configure from the request's parameter payload.
    fn apply_params(&mut self, params: &[u8]) -> Result<(), WireError>;

    /// Parameter payload echoed back in TransferInfo.
    fn pack_params(&self) -> Result<Bytes, WireError>;

    /// Begin resolving the backing content. Must not block. Returns Ok if
    /// streaming can proceed; any terminal status here makes the channel
    /// send a failed TransferInfo and dispose of the source.
    fn init_transfer(&mut self, ctx: &mut TransferCtx) -> TransferStatus;

    /// Produce the next chunk, at most `max_bytes` of it. Skip means "not
    /// ready this tick" — the channel moves on to other sources without
    /// advancing this one.
    fn data_callback(&mut self, ctx: &mut TransferCtx, packet_id: i32, max_bytes: usize)
        -> SourceData;

    /// Invoked exactly once, whatever the outcome, right before the
    /// source is dropped. Release any backing-store handle here.
    fn completion_callback(&mut self, ctx: &mut TransferCtx, status: TransferStatus);
}

// ── Factory registry ──────────────────────────────────────────────────────────

pub type SourceFactory = fn(TransferId, f32) -> Box<dyn TransferSource>;

/// Factory table mapping a source kind to its constructor. The asset kind
/// is built in; re-registering a kind is a programming error and panics —
/// silently swapping the handler for a kind mid-run would corrupt live
/// transfers.
pub struct SourceRegistry {
    factories: HashMap<SourceKind, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(SourceKind::Asset, AssetSource::boxed);
        registry
    }

    pub fn register(&mut self, kind: SourceKind, factory: SourceFactory) {
        if self.factories.insert(kind, factory).is_some() {
            panic!("source kind {kind:?} registered twice");
        }
    }

    pub fn create(
        &self,
        kind: SourceKind,
        id: TransferId,
        priority: f32,
    ) -> Option<Box<dyn TransferSource>> {
        match self.factories.get(&kind) {
            Some(factory) => Some(factory(id, priority)),
            None => {
                tracing::warn!(?kind, transfer_id = %id, "no source factory for kind");
                None
            }
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Built-in asset source ─────────────────────────────────────────────────────

/// Serves an object out of the local store, one packet per
/// `data_callback`.
pub struct AssetSource {
    id: TransferId,
    priority: f32,
    asset: Option<AssetSourceParams>,
    size: Option<u64>,
    offset: u64,
    last_packet_id: i32,
}

impl AssetSource {
    pub fn new(id: TransferId, priority: f32) -> Self {
        Self {
            id,
            priority,
            asset: None,
            size: None,
            offset: 0,
            last_packet_id: -1,
        }
    }

    pub fn boxed(id: TransferId, priority: f32) -> Box<dyn TransferSource> {
        Box::new(Self::new(id, priority))
    }

    fn asset(&self) -> Option<(AssetId, AssetKind)> {
        self.asset.as_ref().map(|params| (params.asset_id, params.kind))
    }
}

impl TransferSource for AssetSource {
    fn id(&self) -> TransferId {
        self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Asset
    }

    fn priority(&self) -> f32 {
        self.priority
    }

    fn set_priority(&mut self, priority: f32) {
        self.priority = priority;
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn last_packet_id(&self) -> i32 {
        self.last_packet_id
    }

    fn set_last_packet_id(&mut self, packet_id: i32) {
        self.last_packet_id = packet_id;
    }

    fn apply_params(&mut self, params: &[u8]) -> Result<(), WireError> {
        self.asset = Some(AssetSourceParams::from_blob(params)?);
        Ok(())
    }

    fn pack_params(&self) -> Result<Bytes, WireError> {
        match &self.asset {
            Some(params) => params.to_blob(),
            None => Ok(Bytes::new()),
        }
    }

    fn init_transfer(&mut self, ctx: &mut TransferCtx) -> TransferStatus {
        let Some((asset_id, kind)) = self.asset() else {
            return TransferStatus::Error;
        };
        match ctx.store.size(asset_id, kind) {
            Ok(size) if size > 0 => {
                self.size = Some(size);
                tracing::debug!(
                    transfer_id = %self.id,
                    asset_id = %asset_id,
                    kind = kind.as_str(),
                    size,
                    "asset source resolved"
                );
                TransferStatus::Ok
            }
            Ok(_) | Err(_) => {
                tracing::info!(
                    transfer_id = %self.id,
                    asset_id = %asset_id,
                    kind = kind.as_str(),
                    "asset source has no such content"
                );
                TransferStatus::UnknownSource
            }
        }
    }

    fn data_callback(
        &mut self,
        ctx: &mut TransferCtx,
        _packet_id: i32,
        max_bytes: usize,
    ) -> SourceData {
        let (size, (asset_id, kind)) = match (self.size, self.asset()) {
            (Some(size), Some(asset)) => (size, asset),
            _ => return SourceData::error(TransferStatus::Error),
        };

        let remaining = size.saturating_sub(self.offset);
        if remaining == 0 {
            return SourceData {
                status: TransferStatus::Done,
                data: Bytes::new(),
            };
        }

        let len = remaining.min(max_bytes as u64) as usize;
        match ctx.store.read(asset_id, kind, self.offset, len) {
            Ok(data) => {
                self.offset += len as u64;
                let status = if self.offset >= size {
                    TransferStatus::Done
                } else {
                    TransferStatus::Ok
                };
                SourceData { status, data }
            }
            Err(error) => {
                tracing::warn!(
                    transfer_id = %self.id,
                    asset_id = %asset_id,
                    %error,
                    "asset source read failed"
                );
                SourceData::error(TransferStatus::Error)
            }
        }
    }

    fn completion_callback(&mut self, _ctx: &mut TransferCtx, status: TransferStatus) {
        tracing::debug!(transfer_id = %self.id, ?status, "asset source complete");
    }
}
