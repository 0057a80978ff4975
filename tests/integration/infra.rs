//! Shared two-node harness.

use std::net::SocketAddr;
use std::sync::mpsc;

use skein_asset::{AssetError, AssetStorage};
use skein_core::config::TransferConfig;
use skein_core::{AssetId, AssetKind, TransferMessage};
use skein_transfer::testing::{MemStore, ScriptedMessageSystem};
use skein_transfer::{TransferCtx, TransferManager};

pub fn addr_a() -> SocketAddr {
    "[::1]:5001".parse().unwrap()
}

pub fn addr_b() -> SocketAddr {
    "[::1]:5002".parse().unwrap()
}

/// Install a subscriber once so RUST_LOG=debug shows the protocol chatter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One endpoint: manager, storage, store, scripted message system.
pub struct Node {
    pub addr: SocketAddr,
    pub msg: ScriptedMessageSystem,
    pub store: MemStore,
    pub config: TransferConfig,
    pub manager: TransferManager,
    pub storage: AssetStorage,
}

impl Node {
    pub fn new(addr: SocketAddr, upstream: Option<SocketAddr>) -> Self {
        init_logging();
        let mut storage = AssetStorage::new();
        storage.set_upstream(upstream);
        Self {
            addr,
            msg: ScriptedMessageSystem::new(),
            store: MemStore::new(),
            config: TransferConfig::default(),
            manager: TransferManager::new(),
            storage,
        }
    }

    /// Requester node, pointed at the provider.
    pub fn requester() -> Self {
        Self::new(addr_a(), Some(addr_b()))
    }

    /// Provider node, seeded by tests with store content.
    pub fn provider() -> Self {
        Self::new(addr_b(), None)
    }

    /// Run one closure with this node's context assembled.
    pub fn with_ctx<R>(
        &mut self,
        op: impl FnOnce(&mut TransferManager, &mut AssetStorage, &mut TransferCtx) -> R,
    ) -> R {
        let mut ctx = TransferCtx::new(&mut self.msg, &mut self.store, &self.config);
        op(&mut self.manager, &mut self.storage, &mut ctx)
    }

    /// Feed one inbound datagram through the manager.
    pub fn deliver(&mut self, sender: SocketAddr, message: TransferMessage) {
        let wire_bytes = message.encode().unwrap().len();
        self.with_ctx(|manager, _, ctx| manager.process_message(ctx, sender, message, wire_bytes));
    }

    /// One cooperative tick: send within throttle budgets, fold in
    /// finished transfers.
    pub fn tick(&mut self) {
        self.with_ctx(|manager, storage, ctx| {
            manager.update_transfers(ctx);
            storage.update(ctx);
        });
    }

    /// Advance this node's clock.
    pub fn advance(&mut self, secs: f64) {
        self.msg.advance(secs);
    }

    /// Take everything this node has sent.
    pub fn outbound(&mut self) -> Vec<(SocketAddr, TransferMessage)> {
        self.msg.drain()
    }

    /// Ask for an asset; the returned receiver yields the callback result.
    pub fn get_asset(
        &mut self,
        id: AssetId,
        kind: AssetKind,
        tag: Option<u64>,
    ) -> mpsc::Receiver<Result<(), AssetError>> {
        let (tx, rx) = mpsc::channel();
        self.with_ctx(|manager, storage, ctx| {
            storage.get_asset_data(
                ctx,
                manager,
                id,
                kind,
                false,
                tag,
                Box::new(move |_, _, result| {
                    let _ = tx.send(result);
                }),
            );
        });
        rx
    }
}

/// Shuttle datagrams between the two nodes until both go quiet, ticking
/// as it goes. Ordering is faithful; tests that need reordering move the
/// messages by hand instead.
pub fn run_until_quiet(a: &mut Node, b: &mut Node) {
    for _ in 0..64 {
        a.tick();
        b.tick();
        let from_a = a.outbound();
        let from_b = b.outbound();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for (dest, message) in from_a {
            assert_eq!(dest, b.addr, "unexpected destination");
            b.deliver(a.addr, message);
        }
        for (dest, message) in from_b {
            assert_eq!(dest, a.addr, "unexpected destination");
            a.deliver(b.addr, message);
        }
        a.advance(0.1);
        b.advance(0.1);
    }
    panic!("nodes never went quiet");
}
