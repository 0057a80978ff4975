//! Test support — an in-memory object store and a scripted message
//! system.
//!
//! Shared by the unit tests here, the asset-layer tests, and the
//! integration harness, which is why this lives in the crate rather than
//! behind #[cfg(test)].

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use bytes::Bytes;

use skein_core::{AssetId, AssetKind, ObjectStore, StoreError, TransferMessage};

use crate::message::MessageSystem;

/// Hash-map backed object store.
#[derive(Default)]
pub struct MemStore {
    objects: HashMap<(AssetId, AssetKind), Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the trait.
    pub fn insert(&mut self, id: AssetId, kind: AssetKind, data: Vec<u8>) {
        self.objects.insert((id, kind), data);
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl ObjectStore for MemStore {
    fn exists(&self, id: AssetId, kind: AssetKind) -> bool {
        self.objects.contains_key(&(id, kind))
    }

    fn size(&self, id: AssetId, kind: AssetKind) -> Result<u64, StoreError> {
        self.objects
            .get(&(id, kind))
            .map(|data| data.len() as u64)
            .ok_or(StoreError::NotFound(id, kind))
    }

    fn read(
        &self,
        id: AssetId,
        kind: AssetKind,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, StoreError> {
        let data = self
            .objects
            .get(&(id, kind))
            .ok_or(StoreError::NotFound(id, kind))?;
        let start = offset as usize;
        let end = start + len;
        if end > data.len() {
            return Err(StoreError::OutOfRange {
                id,
                kind,
                offset,
                len,
                size: data.len() as u64,
            });
        }
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    fn write(&mut self, id: AssetId, kind: AssetKind, data: &[u8]) -> Result<(), StoreError> {
        self.objects.insert((id, kind), data.to_vec());
        Ok(())
    }

    fn remove(&mut self, id: AssetId, kind: AssetKind) -> Result<(), StoreError> {
        self.objects.remove(&(id, kind));
        Ok(())
    }
}

/// Message system that records everything sent, with a manual clock and
/// settable per-host backpressure. Tests drain the recorded messages and
/// feed them wherever they like, in whatever order they like.
pub struct ScriptedMessageSystem {
    sent: Vec<(SocketAddr, TransferMessage)>,
    blocked: HashSet<SocketAddr>,
    now: f64,
}

impl ScriptedMessageSystem {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            blocked: HashSet::new(),
            now: 0.0,
        }
    }

    /// Take every recorded outbound message.
    pub fn drain(&mut self) -> Vec<(SocketAddr, TransferMessage)> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn set_blocked(&mut self, host: SocketAddr, blocked: bool) {
        if blocked {
            self.blocked.insert(host);
        } else {
            self.blocked.remove(&host);
        }
    }

    pub fn advance(&mut self, secs: f64) {
        self.now += secs;
    }

    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }
}

impl Default for ScriptedMessageSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSystem for ScriptedMessageSystem {
    fn send_reliable(
        &mut self,
        host: SocketAddr,
        message: TransferMessage,
    ) -> std::io::Result<usize> {
        let wire_bytes = message
            .encode()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?
            .len();
        self.sent.push((host, message));
        Ok(wire_bytes)
    }

    fn is_blocked(&self, host: &SocketAddr) -> bool {
        self.blocked.contains(host)
    }

    fn now_secs(&self) -> f64 {
        self.now
    }
}
