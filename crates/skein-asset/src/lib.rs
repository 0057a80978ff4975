//! skein-asset — the asset layer on top of the transfer protocol.
//!
//! `FsStore` is the filesystem object store; `AssetStorage` owns the
//! request lifecycle: local-hit short-circuiting, coalescing of
//! concurrent requests for the same content onto one wire transfer,
//! timeouts, and shutdown flushing.

pub mod fs_store;
pub mod storage;

pub use fs_store::FsStore;
pub use storage::{AssetCallback, AssetError, AssetStorage};
