//! skein-transfer — the chunked transfer protocol engine.
//!
//! A reliable chunked-transfer protocol multiplexed over an unreliable
//! datagram substrate: per-category token-bucket throttling, priority-
//! queued sources, out-of-order packet buffering on the target side, and
//! a manager that dispatches the four protocol messages and drives the
//! cooperative tick.

pub mod channel;
pub mod connection;
pub mod manager;
pub mod message;
pub mod prique;
pub mod source;
pub mod target;
pub mod testing;
pub mod throttle;

pub use channel::{SourceChannel, TargetChannel};
pub use connection::TransferConnection;
pub use manager::TransferManager;
pub use message::{MessageSystem, TransferCtx};
pub use prique::PriQueueMap;
pub use source::{AssetSource, SourceData, SourceRegistry, TransferSource};
pub use target::{CompletionNotify, DelayedPacket, FileTarget, TransferTarget, VFileTarget};
pub use throttle::{Throttle, ThrottleCategory, ThrottleGroup};
