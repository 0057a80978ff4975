//! Asset storage — request coalescing on top of the transfer layer.
//!
//! Callers ask for content by (id, kind). A local hit answers
//! synchronously; otherwise one transfer is opened upstream on the Asset
//! traffic class, and every caller who asks for the same content while it
//! is in flight is coalesced onto that single wire request. Each
//! registered callback fires exactly once — on completion, timeout, or
//! shutdown — and never before this layer has re-validated the stored
//! object.
//!
//! Transfer completions arrive through an mpsc channel fed by the
//! targets' one-shot notifiers and are folded in on `update()`, which the
//! embedding application calls once per tick alongside
//! `TransferManager::update_transfers`.

use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};

use skein_core::params::AssetSourceParams;
use skein_core::{AssetId, AssetKind, ChannelKind, SourceKind, TransferId, TransferStatus};
use skein_transfer::{TransferCtx, TransferManager, VFileTarget};

/// Priority assigned to asset fetches on the wire; priority requests sit
/// one notch above the rest.
const ASSET_PRIORITY_BASE: f32 = 100.0;

/// How a pending asset request ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found")]
    NotFound,
    #[error("asset request timed out")]
    Timeout,
    #[error("connection to the asset provider is gone")]
    CircuitGone,
    #[error("transfer aborted")]
    Aborted,
    #[error("insufficient permissions")]
    InsufficientPermissions,
    #[error("transfer failed")]
    TransferFailed,
    #[error("upload failed")]
    UploadFailed,
}

impl AssetError {
    fn from_status(status: TransferStatus) -> Self {
        match status {
            TransferStatus::UnknownSource => AssetError::NotFound,
            TransferStatus::Abort => AssetError::Aborted,
            TransferStatus::InsufficientPermissions => AssetError::InsufficientPermissions,
            TransferStatus::Timeout => AssetError::Timeout,
            TransferStatus::CircuitGone => AssetError::CircuitGone,
            _ => AssetError::TransferFailed,
        }
    }
}

/// Completion callback for a get or store request. Consumed on first (and
/// only) invocation.
pub type AssetCallback = Box<dyn FnOnce(AssetId, AssetKind, Result<(), AssetError>)>;

struct AssetRequest {
    asset_id: AssetId,
    kind: AssetKind,
    /// Caller-supplied duplicate-detection token. Two requests for the
    /// same content with equal `Some` tags are one request.
    tag: Option<u64>,
    callback: AssetCallback,
    created: f64,
}

struct TransferOutcome {
    asset_id: AssetId,
    kind: AssetKind,
    status: TransferStatus,
}

pub struct AssetStorage {
    upstream: Option<SocketAddr>,
    pending_downloads: Vec<AssetRequest>,
    pending_uploads: Vec<AssetRequest>,
    outcome_tx: Sender<TransferOutcome>,
    outcome_rx: Receiver<TransferOutcome>,
    shut_down: bool,
}

impl AssetStorage {
    pub fn new() -> Self {
        let (outcome_tx, outcome_rx) = channel();
        Self {
            upstream: None,
            pending_downloads: Vec::new(),
            pending_uploads: Vec::new(),
            outcome_tx,
            outcome_rx,
            shut_down: false,
        }
    }

    /// Set the upstream content provider. Requests that miss locally are
    /// fetched from here.
    pub fn set_upstream(&mut self, upstream: Option<SocketAddr>) {
        tracing::info!(?upstream, "asset storage upstream provider set");
        self.upstream = upstream;
    }

    pub fn pending_download_count(&self) -> usize {
        self.pending_downloads.len()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.pending_uploads.len()
    }

    /// True if a valid (non-empty) copy exists in the local store.
    pub fn has_local(&self, ctx: &TransferCtx, id: AssetId, kind: AssetKind) -> bool {
        ctx.store.size(id, kind).map(|size| size > 0).unwrap_or(false)
    }

    // ── Downloads ─────────────────────────────────────────────────────────

    /// Fetch an asset, locally if possible, otherwise over the wire.
    ///
    /// The callback fires exactly once: synchronously on a local hit (or
    /// nil id), later via `update()` otherwise. Concurrent requests for
    /// the same (id, kind) share one wire transfer; a request whose `tag`
    /// equals an already-pending one is discarded outright as a true
    /// duplicate and its callback never fires.
    #[allow(clippy::too_many_arguments)]
    pub fn get_asset_data(
        &mut self,
        ctx: &mut TransferCtx,
        manager: &mut TransferManager,
        id: AssetId,
        kind: AssetKind,
        is_priority: bool,
        tag: Option<u64>,
        callback: AssetCallback,
    ) {
        if self.shut_down {
            // No fetches and no callbacks once shutdown has begun.
            return;
        }

        if id.is_nil() {
            callback(id, kind, Err(AssetError::NotFound));
            return;
        }

        let exists = ctx.store.exists(id, kind);
        let size = if exists {
            ctx.store.size(id, kind).unwrap_or(0)
        } else {
            0
        };

        if size > 0 {
            tracing::debug!(asset_id = %id, kind = kind.as_str(), "asset found in store");
            callback(id, kind, Ok(()));
            return;
        }

        if exists {
            tracing::warn!(asset_id = %id, kind = kind.as_str(),
                "zero-size object in store, removing");
            let _ = ctx.store.remove(id, kind);
        }

        // Is a download of this content already in flight?
        let mut duplicate = false;
        for pending in &self.pending_downloads {
            if pending.asset_id == id && pending.kind == kind {
                if tag.is_some() && pending.tag == tag {
                    tracing::warn!(asset_id = %id, kind = kind.as_str(),
                        "discarding duplicate request for asset");
                    return;
                }
                duplicate = true;
            }
        }
        if duplicate {
            tracing::info!(asset_id = %id, kind = kind.as_str(),
                "coalescing additional request for in-flight asset");
        }

        let Some(upstream) = self.upstream else {
            tracing::warn!(asset_id = %id, kind = kind.as_str(),
                "asset request with no upstream provider");
            callback(id, kind, Err(AssetError::CircuitGone));
            return;
        };

        let params = match (AssetSourceParams { asset_id: id, kind }).to_blob() {
            Ok(params) => params,
            Err(error) => {
                tracing::warn!(asset_id = %id, %error, "failed to pack asset params");
                callback(id, kind, Err(AssetError::TransferFailed));
                return;
            }
        };

        self.pending_downloads.push(AssetRequest {
            asset_id: id,
            kind,
            tag,
            callback,
            created: ctx.msg.now_secs(),
        });

        if !duplicate {
            let transfer_id = TransferId::generate();
            let outcome_tx = self.outcome_tx.clone();
            let target = VFileTarget::new(transfer_id, id, kind).with_notify(Box::new(
                move |status| {
                    let _ = outcome_tx.send(TransferOutcome {
                        asset_id: id,
                        kind,
                        status,
                    });
                },
            ));

            tracing::info!(asset_id = %id, kind = kind.as_str(), transfer_id = %transfer_id,
                "starting asset transfer");
            let priority = ASSET_PRIORITY_BASE + if is_priority { 1.0 } else { 0.0 };
            manager.request_transfer(
                ctx,
                upstream,
                ChannelKind::Asset,
                SourceKind::Asset,
                params,
                Box::new(target),
                priority,
            );
        }
    }

    /// Fold in finished transfers and fire every coalesced callback.
    /// Call once per tick.
    pub fn update(&mut self, ctx: &mut TransferCtx) {
        let outcomes: Vec<TransferOutcome> = self.outcome_rx.try_iter().collect();
        for outcome in outcomes {
            let mut result = match outcome.status {
                TransferStatus::Done => Ok(()),
                status => Err(AssetError::from_status(status)),
            };

            if result.is_ok() {
                // The transfer said Done; make sure the store agrees
                // before telling anyone.
                let size = ctx.store.size(outcome.asset_id, outcome.kind).unwrap_or(0);
                if size == 0 {
                    tracing::warn!(asset_id = %outcome.asset_id,
                        kind = outcome.kind.as_str(),
                        "downloaded asset is missing or empty");
                    let _ = ctx.store.remove(outcome.asset_id, outcome.kind);
                    result = Err(AssetError::NotFound);
                }
            }

            self.complete_downloads(outcome.asset_id, outcome.kind, result);
        }
    }

    /// Fire and remove every pending download for (id, kind), newest
    /// registration first.
    fn complete_downloads(&mut self, id: AssetId, kind: AssetKind, result: Result<(), AssetError>) {
        let mut matched = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending_downloads.len());
        for request in self.pending_downloads.drain(..) {
            if request.asset_id == id && request.kind == kind {
                matched.push(request);
            } else {
                remaining.push(request);
            }
        }
        self.pending_downloads = remaining;

        for request in matched.into_iter().rev() {
            (request.callback)(id, kind, result);
        }
    }

    /// Expire pending downloads older than the configured absolute
    /// timeout. Uploads are exempt — only shutdown clears them.
    pub fn check_for_timeouts(&mut self, ctx: &mut TransferCtx) {
        let now = ctx.msg.now_secs();
        let timeout = ctx.config.asset.request_timeout_secs;

        let mut timed_out = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending_downloads.len());
        for request in self.pending_downloads.drain(..) {
            if now - request.created > timeout {
                tracing::warn!(asset_id = %request.asset_id,
                    kind = request.kind.as_str(),
                    age_secs = now - request.created,
                    "asset download request timed out");
                timed_out.push(request);
            } else {
                remaining.push(request);
            }
        }
        self.pending_downloads = remaining;

        for request in timed_out.into_iter().rev() {
            let (id, kind) = (request.asset_id, request.kind);
            (request.callback)(id, kind, Err(AssetError::Timeout));
        }
    }

    /// Force-complete everything with CircuitGone, newest registrations
    /// first. Requests arriving after this are ignored.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        let downloads = std::mem::take(&mut self.pending_downloads);
        let uploads = std::mem::take(&mut self.pending_uploads);
        let aborted = downloads.len() + uploads.len();
        for request in downloads.into_iter().rev().chain(uploads.into_iter().rev()) {
            let (id, kind) = (request.asset_id, request.kind);
            (request.callback)(id, kind, Err(AssetError::CircuitGone));
        }
        if aborted > 0 {
            tracing::warn!(aborted, "asset storage shut down with pending requests");
        }
    }

    // ── Uploads ───────────────────────────────────────────────────────────

    /// Write an asset into the local store and, unless `local`, track it
    /// as pending until the upstream provider acknowledges it via
    /// `process_upload_complete`.
    pub fn store_asset_data(
        &mut self,
        ctx: &mut TransferCtx,
        id: AssetId,
        kind: AssetKind,
        data: &[u8],
        local: bool,
        callback: AssetCallback,
    ) {
        if self.shut_down {
            return;
        }
        if id.is_nil() {
            callback(id, kind, Err(AssetError::NotFound));
            return;
        }

        if let Err(error) = ctx.store.write(id, kind, data) {
            tracing::warn!(asset_id = %id, kind = kind.as_str(), %error,
                "failed to write asset to store");
            callback(id, kind, Err(AssetError::UploadFailed));
            return;
        }

        if local {
            callback(id, kind, Ok(()));
            return;
        }

        tracing::info!(asset_id = %id, kind = kind.as_str(), bytes = data.len(),
            "asset stored, awaiting upstream acknowledgement");
        self.pending_uploads.push(AssetRequest {
            asset_id: id,
            kind,
            tag: None,
            callback,
            created: ctx.msg.now_secs(),
        });
    }

    /// The upstream provider acknowledged (or rejected) an upload.
    /// Unknown (id, kind) pairs are a no-op.
    pub fn process_upload_complete(&mut self, id: AssetId, kind: AssetKind, success: bool) {
        let mut matched = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending_uploads.len());
        for request in self.pending_uploads.drain(..) {
            if request.asset_id == id && request.kind == kind {
                matched.push(request);
            } else {
                remaining.push(request);
            }
        }
        self.pending_uploads = remaining;

        let result = if success {
            Ok(())
        } else {
            Err(AssetError::UploadFailed)
        };
        for request in matched.into_iter().rev() {
            (request.callback)(id, kind, result);
        }
    }
}

impl Default for AssetStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use skein_core::config::TransferConfig;
    use skein_core::{ObjectStore, TransferMessage};
    use skein_transfer::testing::{MemStore, ScriptedMessageSystem};
    use std::sync::mpsc;

    fn upstream() -> SocketAddr {
        "[::1]:9100".parse().unwrap()
    }

    struct Rig {
        msg: ScriptedMessageSystem,
        store: MemStore,
        config: TransferConfig,
        manager: TransferManager,
        storage: AssetStorage,
    }

    impl Rig {
        fn new() -> Self {
            let mut storage = AssetStorage::new();
            storage.set_upstream(Some(upstream()));
            Self {
                msg: ScriptedMessageSystem::new(),
                store: MemStore::new(),
                config: TransferConfig::default(),
                manager: TransferManager::new(),
                storage,
            }
        }

        fn get(
            &mut self,
            id: AssetId,
            kind: AssetKind,
            tag: Option<u64>,
        ) -> mpsc::Receiver<Result<(), AssetError>> {
            let (tx, rx) = mpsc::channel();
            let mut ctx = TransferCtx::new(&mut self.msg, &mut self.store, &self.config);
            self.storage.get_asset_data(
                &mut ctx,
                &mut self.manager,
                id,
                kind,
                false,
                tag,
                Box::new(move |_, _, result| {
                    let _ = tx.send(result);
                }),
            );
            rx
        }

        fn feed(&mut self, message: TransferMessage) {
            let wire_bytes = message.encode().unwrap().len();
            let mut ctx = TransferCtx::new(&mut self.msg, &mut self.store, &self.config);
            self.manager
                .process_message(&mut ctx, upstream(), message, wire_bytes);
        }

        fn update_storage(&mut self) {
            let mut ctx = TransferCtx::new(&mut self.msg, &mut self.store, &self.config);
            self.storage.update(&mut ctx);
        }

        /// The single wire request this rig is expected to have sent.
        fn sent_request(&mut self) -> (TransferId, f32) {
            let requests: Vec<(TransferId, f32)> = self
                .msg
                .drain()
                .into_iter()
                .filter_map(|(_, m)| match m {
                    TransferMessage::Request {
                        transfer_id,
                        priority,
                        ..
                    } => Some((transfer_id, priority)),
                    _ => None,
                })
                .collect();
            assert_eq!(requests.len(), 1, "expected exactly one wire request");
            requests[0]
        }
    }

    #[test]
    fn nil_id_fails_synchronously_with_no_wire_traffic() {
        let mut rig = Rig::new();
        let rx = rig.get(AssetId::NIL, AssetKind::Texture, None);
        assert_eq!(rx.try_recv().unwrap(), Err(AssetError::NotFound));
        assert!(rig.msg.drain().is_empty());
    }

    #[test]
    fn local_hit_answers_synchronously() {
        let mut rig = Rig::new();
        let id = AssetId::generate();
        rig.store.insert(id, AssetKind::Texture, vec![1u8; 64]);

        let rx = rig.get(id, AssetKind::Texture, None);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert!(rig.msg.drain().is_empty());
    }

    #[test]
    fn zero_byte_local_copy_is_removed_and_refetched() {
        let mut rig = Rig::new();
        let id = AssetId::generate();
        rig.store.insert(id, AssetKind::Texture, Vec::new());

        let rx = rig.get(id, AssetKind::Texture, None);
        assert!(rx.try_recv().is_err(), "no synchronous answer expected");
        assert!(!rig.store.exists(id, AssetKind::Texture));
        rig.sent_request();
    }

    #[test]
    fn concurrent_requests_coalesce_onto_one_transfer() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let rx_first = rig.get(id, AssetKind::Texture, Some(1));
        let rx_second = rig.get(id, AssetKind::Texture, Some(2));
        assert_eq!(rig.storage.pending_download_count(), 2);

        let (transfer_id, priority) = rig.sent_request();
        assert_eq!(priority, 100.0);

        // Complete the transfer through the real manager path.
        rig.feed(TransferMessage::Info {
            transfer_id,
            channel: ChannelKind::Asset,
            target_kind: skein_core::TargetKind::Unknown,
            status: TransferStatus::Ok,
            size: 3,
            params: Bytes::new(),
        });
        rig.feed(TransferMessage::Packet {
            transfer_id,
            channel: ChannelKind::Asset,
            packet_id: 0,
            status: TransferStatus::Done,
            data: Bytes::from_static(b"abc"),
        });
        rig.update_storage();

        assert_eq!(rx_first.try_recv().unwrap(), Ok(()));
        assert_eq!(rx_second.try_recv().unwrap(), Ok(()));
        assert_eq!(rig.storage.pending_download_count(), 0);
    }

    #[test]
    fn equal_tags_are_discarded_as_true_duplicates() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let _rx_first = rig.get(id, AssetKind::Texture, Some(7));
        let rx_dup = rig.get(id, AssetKind::Texture, Some(7));

        assert_eq!(rig.storage.pending_download_count(), 1);
        // The duplicate's callback is dropped unfired.
        assert!(rx_dup.try_recv().is_err());
        rig.sent_request();
    }

    #[test]
    fn untagged_requests_never_match_as_duplicates() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let _rx_first = rig.get(id, AssetKind::Texture, None);
        let _rx_second = rig.get(id, AssetKind::Texture, None);
        assert_eq!(rig.storage.pending_download_count(), 2);
        rig.sent_request();
    }

    #[test]
    fn failed_transfer_reports_mapped_error() {
        let mut rig = Rig::new();
        let id = AssetId::generate();
        let rx = rig.get(id, AssetKind::Sound, None);
        let (transfer_id, _) = rig.sent_request();

        rig.feed(TransferMessage::Info {
            transfer_id,
            channel: ChannelKind::Asset,
            target_kind: skein_core::TargetKind::Unknown,
            status: TransferStatus::UnknownSource,
            size: 0,
            params: Bytes::new(),
        });
        rig.update_storage();

        assert_eq!(rx.try_recv().unwrap(), Err(AssetError::NotFound));
        assert_eq!(rig.storage.pending_download_count(), 0);
    }

    #[test]
    fn timeout_sweep_expires_old_downloads_only() {
        let mut rig = Rig::new();
        let id = AssetId::generate();
        let rx = rig.get(id, AssetKind::Texture, None);
        rig.sent_request();

        rig.msg.advance(100.0);
        {
            let mut ctx = TransferCtx::new(&mut rig.msg, &mut rig.store, &rig.config);
            rig.storage.check_for_timeouts(&mut ctx);
        }
        assert!(rx.try_recv().is_err(), "under the timeout, still pending");

        rig.msg.advance(250.0);
        {
            let mut ctx = TransferCtx::new(&mut rig.msg, &mut rig.store, &rig.config);
            rig.storage.check_for_timeouts(&mut ctx);
        }
        assert_eq!(rx.try_recv().unwrap(), Err(AssetError::Timeout));
        assert_eq!(rig.storage.pending_download_count(), 0);
    }

    #[test]
    fn shutdown_flushes_everything_in_reverse_order() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let (tx, rx) = mpsc::channel();
        for label in ["first", "second"] {
            let tx = tx.clone();
            let mut ctx = TransferCtx::new(&mut rig.msg, &mut rig.store, &rig.config);
            rig.storage.get_asset_data(
                &mut ctx,
                &mut rig.manager,
                id,
                AssetKind::Texture,
                false,
                None,
                Box::new(move |_, _, result| {
                    let _ = tx.send((label, result));
                }),
            );
        }

        rig.storage.shutdown();
        let order: Vec<&str> = rx.try_iter().map(|(label, result)| {
            assert_eq!(result, Err(AssetError::CircuitGone));
            label
        }).collect();
        assert_eq!(order, vec!["second", "first"]);

        // Requests after shutdown are ignored entirely.
        let rx_late = rig.get(AssetId::generate(), AssetKind::Sound, None);
        assert!(rx_late.try_recv().is_err());
        assert_eq!(rig.storage.pending_download_count(), 0);
    }

    #[test]
    fn no_upstream_fails_with_circuit_gone() {
        let mut rig = Rig::new();
        rig.storage.set_upstream(None);
        let rx = rig.get(AssetId::generate(), AssetKind::Texture, None);
        assert_eq!(rx.try_recv().unwrap(), Err(AssetError::CircuitGone));
        assert!(rig.msg.drain().is_empty());
    }

    #[test]
    fn upload_completes_on_upstream_acknowledgement() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let (tx, rx) = mpsc::channel();
        {
            let mut ctx = TransferCtx::new(&mut rig.msg, &mut rig.store, &rig.config);
            rig.storage.store_asset_data(
                &mut ctx,
                id,
                AssetKind::Notecard,
                b"note body",
                false,
                Box::new(move |_, _, result| {
                    let _ = tx.send(result);
                }),
            );
        }
        assert!(rig.store.exists(id, AssetKind::Notecard));
        assert_eq!(rig.storage.pending_upload_count(), 1);
        assert!(rx.try_recv().is_err());

        rig.storage.process_upload_complete(id, AssetKind::Notecard, true);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(rig.storage.pending_upload_count(), 0);
    }

    #[test]
    fn local_store_completes_synchronously() {
        let mut rig = Rig::new();
        let id = AssetId::generate();

        let (tx, rx) = mpsc::channel();
        let mut ctx = TransferCtx::new(&mut rig.msg, &mut rig.store, &rig.config);
        rig.storage.store_asset_data(
            &mut ctx,
            id,
            AssetKind::Script,
            b"script body",
            true,
            Box::new(move |_, _, result| {
                let _ = tx.send(result);
            }),
        );
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(rig.storage.pending_upload_count(), 0);
    }
}
