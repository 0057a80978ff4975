//! Object store abstraction.
//!
//! The local content store is keyed by (asset id, kind). The transfer
//! layer reads from it on the serving side and writes completed downloads
//! into it on the receiving side; the asset layer owns the request
//! lifecycle on top. Writes are whole-object and atomic — a reader never
//! observes a partially written object.

use bytes::Bytes;

use crate::id::{AssetId, AssetKind};

/// Content-addressed local store. The filesystem implementation lives in
/// skein-asset; tests use the in-memory one from skein-transfer.
pub trait ObjectStore {
    fn exists(&self, id: AssetId, kind: AssetKind) -> bool;

    /// Size in bytes. `NotFound` if absent.
    fn size(&self, id: AssetId, kind: AssetKind) -> Result<u64, StoreError>;

    /// Read `len` bytes at `offset`. Short reads are an error — callers
    /// ask for ranges they know exist.
    fn read(&self, id: AssetId, kind: AssetKind, offset: u64, len: usize)
        -> Result<Bytes, StoreError>;

    /// Replace the object's contents atomically.
    fn write(&mut self, id: AssetId, kind: AssetKind, data: &[u8]) -> Result<(), StoreError>;

    /// Remove the object. Removing an absent object is a no-op.
    fn remove(&mut self, id: AssetId, kind: AssetKind) -> Result<(), StoreError>;
}

/// Errors from the object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {0}.{} not found", .1.as_str())]
    NotFound(AssetId, AssetKind),

    #[error("read past end of {id}.{}: offset {offset} len {len} size {size}", .kind.as_str())]
    OutOfRange {
        id: AssetId,
        kind: AssetKind,
        offset: u64,
        len: usize,
        size: u64,
    },

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}
