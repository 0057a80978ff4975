//! Filesystem object store.
//!
//! Objects are stored by id in a two-level directory structure:
//!   {root}/{hex[0..2]}/{full_hex}.{kind}
//!
//! This is the same layout Git uses for objects. Writes are atomic (temp
//! file, then rename), so a reader never observes a partial object; reads
//! go through mmap so page faults bring data from disk on demand.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use memmap2::Mmap;

use skein_core::{AssetId, AssetKind, ObjectStore, StoreError};

/// Filesystem-backed object store.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at the given directory.
    ///
    /// For production: /var/cache/skein/objects
    /// For testing: /tmp/skein-store-{pid}
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Get the filesystem path for an object.
    fn object_path(&self, id: AssetId, kind: AssetKind) -> PathBuf {
        let hex = id.to_hex();
        // Two-level: objects/ab/abc123....texture
        self.root
            .join(&hex[0..2])
            .join(format!("{}.{}", hex, kind.as_str()))
    }

    fn mmap(&self, id: AssetId, kind: AssetKind) -> Result<Mmap, StoreError> {
        let path = self.object_path(id, kind);
        if !path.exists() {
            return Err(StoreError::NotFound(id, kind));
        }
        let file = fs::File::open(&path)?;
        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(mmap)
    }

    /// Count objects in the store (for stats/debugging).
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }

    pub fn clear(&self) {
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}

impl ObjectStore for FsStore {
    fn exists(&self, id: AssetId, kind: AssetKind) -> bool {
        self.object_path(id, kind).exists()
    }

    fn size(&self, id: AssetId, kind: AssetKind) -> Result<u64, StoreError> {
        let path = self.object_path(id, kind);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id, kind))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn read(
        &self,
        id: AssetId,
        kind: AssetKind,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, StoreError> {
        let mmap = self.mmap(id, kind)?;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if end > mmap.len() {
            return Err(StoreError::OutOfRange {
                id,
                kind,
                offset,
                len,
                size: mmap.len() as u64,
            });
        }
        Ok(Bytes::copy_from_slice(&mmap[start..end]))
    }

    fn write(&mut self, id: AssetId, kind: AssetKind, data: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(id, kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: tmp file → rename
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        tracing::trace!(id = %id, kind = kind.as_str(), bytes = data.len(), "object stored");
        Ok(())
    }

    fn remove(&mut self, id: AssetId, kind: AssetKind) -> Result<(), StoreError> {
        let path = self.object_path(id, kind);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
