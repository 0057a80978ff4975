//! Message substrate abstraction and the transfer context.
//!
//! The transfer layer rides an externally supplied datagram channel. It
//! never opens sockets and never retries: control messages use the
//! substrate's reliable option, data packets are fire-and-forget, and
//! packet reordering is handled by the target layer. The substrate also
//! owns the clock — every time-dependent computation in this crate takes
//! seconds from `now_secs`.

use std::net::SocketAddr;

use skein_core::config::TransferConfig;
use skein_core::{ObjectStore, TransferMessage};

/// The datagram channel the protocol rides on.
///
/// `send_reliable` is expected to retry internally; when it ultimately
/// gives up, the substrate must call
/// [`TransferManager::reliable_failed`](crate::manager::TransferManager::reliable_failed)
/// with the affected transfer id.
pub trait MessageSystem {
    /// Send with the substrate's reliable-delivery option. Returns the
    /// datagram size in bytes, for bandwidth accounting.
    fn send_reliable(&mut self, host: SocketAddr, message: TransferMessage) -> std::io::Result<usize>;

    /// True while the connection to `host` is back-pressured. No transfer
    /// traffic is sent to a blocked host; throttle credit simply accrues.
    fn is_blocked(&self, host: &SocketAddr) -> bool;

    /// Monotonic clock, in seconds. Only differences are meaningful.
    fn now_secs(&self) -> f64;
}

/// Everything a transfer operation needs from its environment, passed
/// explicitly by the caller. There are no process-wide singletons.
pub struct TransferCtx<'a> {
    pub msg: &'a mut dyn MessageSystem,
    pub store: &'a mut dyn ObjectStore,
    pub config: &'a TransferConfig,
}

impl<'a> TransferCtx<'a> {
    pub fn new(
        msg: &'a mut dyn MessageSystem,
        store: &'a mut dyn ObjectStore,
        config: &'a TransferConfig,
    ) -> Self {
        Self { msg, store, config }
    }
}
