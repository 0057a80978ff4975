//! Transfer channels — all sources or targets for one (host, traffic
//! class) pair.
//!
//! The source channel services its priority queue once per manager tick,
//! gated by the throttle group. The target channel owns the out-of-order
//! packet buffer and the single in-order delivery pump shared by the
//! packet path and the info replay path.
//!
//! Transfers are keyed by id everywhere; completion removes the entry in
//! the same call, and the service loop walks an id snapshot, so removal
//! mid-tick cannot invalidate anything.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use bytes::Bytes;

use skein_core::{ChannelKind, TargetKind, TransferId, TransferMessage, TransferStatus};

use crate::message::TransferCtx;
use crate::prique::PriQueueMap;
use crate::source::TransferSource;
use crate::target::{DelayedPacket, TransferTarget};
use crate::throttle::{ThrottleCategory, ThrottleGroup};

fn throttle_category(channel: ChannelKind) -> ThrottleCategory {
    match channel {
        ChannelKind::Asset => ThrottleCategory::Asset,
        ChannelKind::Misc => ThrottleCategory::Task,
    }
}

// ── Source side ───────────────────────────────────────────────────────────────

/// All sending-side transfers for one (host, channel) pair, serviced in
/// strict priority order.
pub struct SourceChannel {
    host: SocketAddr,
    channel: ChannelKind,
    category: ThrottleCategory,
    sources: PriQueueMap<Box<dyn TransferSource>>,
}

impl SourceChannel {
    pub fn new(channel: ChannelKind, host: SocketAddr) -> Self {
        Self {
            host,
            channel,
            category: throttle_category(channel),
            sources: PriQueueMap::new(),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn host(&self) -> SocketAddr {
        self.host
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.sources.contains(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Initialize a freshly created source and answer the requester with
    /// TransferInfo. On Ok the source joins the priority queue; any other
    /// status is terminal and the source is disposed of after its
    /// completion callback.
    pub fn start(&mut self, ctx: &mut TransferCtx, mut source: Box<dyn TransferSource>) {
        let status = source.init_transfer(ctx);
        let info = TransferMessage::Info {
            transfer_id: source.id(),
            channel: self.channel,
            target_kind: TargetKind::Unknown,
            status,
            size: source.size().unwrap_or(0),
            params: source.pack_params().unwrap_or_default(),
        };
        if let Err(error) = ctx.msg.send_reliable(self.host, info) {
            tracing::warn!(host = %self.host, %error, "failed to send transfer info");
        }

        if status == TransferStatus::Ok {
            self.sources.push(source.priority(), source.id(), source);
        } else {
            tracing::info!(
                transfer_id = %source.id(),
                ?status,
                "transfer source failed to initialize"
            );
            source.completion_callback(ctx, status);
        }
    }

    /// Move a queued source to a new priority. A transfer that has
    /// already completed is a no-op.
    pub fn update_priority(&mut self, id: TransferId, priority: f32) {
        if !self.sources.contains(id) {
            tracing::debug!(transfer_id = %id, "priority update for finished transfer");
            return;
        }
        self.sources.reprioritize(priority, id);
        if let Some(source) = self.sources.get_mut(id) {
            source.set_priority(priority);
        }
    }

    /// One service pass: send packets in priority order until the
    /// category budget for this tick runs out. Returns the bits put on
    /// the wire.
    pub fn update(&mut self, ctx: &mut TransferCtx, throttles: &mut ThrottleGroup) -> u64 {
        if ctx.msg.is_blocked(&self.host) {
            // Credit simply accrues; sending into a blocked circuit would
            // only pile packets up on the far end.
            return 0;
        }
        let now = ctx.msg.now_secs();
        if throttles.check_overflow(self.category, 0.0, now) {
            return 0;
        }

        let packet_size = ctx.config.transfer.packet_data_size;
        let mut bits_sent: u64 = 0;
        let mut budget_exhausted = false;

        // Snapshot the service order; completions mutate the queue.
        for id in self.sources.ids_by_priority() {
            if budget_exhausted {
                break;
            }
            // Drain the highest-priority source before touching the next.
            loop {
                let (packet_id, chunk) = match self.sources.get_mut(id) {
                    Some(source) => {
                        let packet_id = source.next_packet_id();
                        (packet_id, source.data_callback(ctx, packet_id, packet_size))
                    }
                    None => break,
                };

                if chunk.status == TransferStatus::Skip {
                    // Nothing ready this tick; other sources may proceed.
                    break;
                }

                // Send even terminal packets — the status code tells the
                // target how to react.
                let status = chunk.status;
                let message = TransferMessage::Packet {
                    transfer_id: id,
                    channel: self.channel,
                    packet_id,
                    status,
                    data: chunk.data,
                };
                let sent_bytes = match ctx.msg.send_reliable(self.host, message) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(host = %self.host, transfer_id = %id, %error,
                            "packet send failed, retrying next tick");
                        break;
                    }
                };

                let bits = (sent_bytes as u64) * 8;
                bits_sent += bits;
                let now = ctx.msg.now_secs();
                budget_exhausted = throttles.throttle_overflow(self.category, bits as f64, now);

                if let Some(source) = self.sources.get_mut(id) {
                    source.set_last_packet_id(packet_id);
                }

                if status.is_terminal() {
                    if let Some(mut source) = self.sources.remove(id) {
                        source.completion_callback(ctx, status);
                    }
                    break;
                }
                if budget_exhausted {
                    break;
                }
            }
        }
        bits_sent
    }

    /// Abort one transfer: notify the peer, fire the completion callback,
    /// drop the source. Unknown ids are a no-op.
    pub fn abort(&mut self, ctx: &mut TransferCtx, id: TransferId) -> bool {
        let Some(mut source) = self.sources.remove(id) else {
            return false;
        };
        tracing::info!(transfer_id = %id, host = %self.host, "aborting transfer source");
        let abort = TransferMessage::Abort {
            transfer_id: id,
            channel: self.channel,
        };
        if let Err(error) = ctx.msg.send_reliable(self.host, abort) {
            tracing::debug!(host = %self.host, %error, "abort notification failed");
        }
        source.completion_callback(ctx, TransferStatus::Abort);
        true
    }

    /// Abort everything. Used when the connection goes away.
    pub fn shutdown(&mut self, ctx: &mut TransferCtx) {
        for id in self.sources.ids_by_priority() {
            self.abort(ctx, id);
        }
    }
}

// ── Target side ───────────────────────────────────────────────────────────────

struct TargetEntry {
    target: Box<dyn TransferTarget>,
    delayed: BTreeMap<i32, DelayedPacket>,
}

/// All receiving-side transfers for one (host, channel) pair. Inbound is
/// never throttled — rate limiting is the sender's concern.
pub struct TargetChannel {
    host: SocketAddr,
    channel: ChannelKind,
    targets: HashMap<TransferId, TargetEntry>,
}

impl TargetChannel {
    pub fn new(channel: ChannelKind, host: SocketAddr) -> Self {
        Self {
            host,
            channel,
            targets: HashMap::new(),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn host(&self) -> SocketAddr {
        self.host
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.targets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Register a target and ask the peer to start sending. The transfer
    /// id is the one baked into the target at construction.
    pub fn request_transfer(
        &mut self,
        ctx: &mut TransferCtx,
        source_kind: skein_core::SourceKind,
        source_params: Bytes,
        target: Box<dyn TransferTarget>,
        priority: f32,
    ) -> TransferId {
        let id = target.id();
        if self.targets.contains_key(&id) {
            // A random 128-bit collision, or a caller reusing a live id.
            tracing::error!(transfer_id = %id, "transfer id already in use, dropping request");
            let mut target = target;
            target.completion_callback(ctx, TransferStatus::Error);
            return id;
        }

        self.targets.insert(
            id,
            TargetEntry {
                target,
                delayed: BTreeMap::new(),
            },
        );

        let request = TransferMessage::Request {
            transfer_id: id,
            channel: self.channel,
            source_kind,
            priority,
            params: source_params,
        };
        if let Err(error) = ctx.msg.send_reliable(self.host, request) {
            tracing::warn!(host = %self.host, transfer_id = %id, %error,
                "failed to send transfer request");
        }
        tracing::debug!(transfer_id = %id, host = %self.host, ?source_kind,
            "transfer requested");
        id
    }

    /// Handle the source's TransferInfo answer.
    pub fn process_info(
        &mut self,
        ctx: &mut TransferCtx,
        id: TransferId,
        status: TransferStatus,
        size: u64,
        params: &[u8],
    ) {
        if !self.targets.contains_key(&id) {
            tracing::warn!(transfer_id = %id, "transfer info for unknown transfer");
            return;
        }

        if status != TransferStatus::Ok {
            tracing::warn!(transfer_id = %id, ?status, "non-ok transfer info, cleaning up");
            self.complete(ctx, id, status);
            return;
        }

        let bad_params = match self.targets.get_mut(&id) {
            Some(entry) => match entry.target.apply_params(params) {
                Ok(()) => {
                    entry.target.set_info(size);
                    false
                }
                Err(error) => {
                    tracing::warn!(transfer_id = %id, %error,
                        "bad target params in transfer info");
                    true
                }
            },
            None => return,
        };
        if bad_params {
            self.abort(ctx, id);
            return;
        }
        tracing::debug!(transfer_id = %id, size, "transfer info received");

        // Packets that raced ahead of the info message replay now.
        self.pump(ctx, id);
    }

    /// Handle one data packet, in whatever order it arrived.
    pub fn process_packet(
        &mut self,
        ctx: &mut TransferCtx,
        id: TransferId,
        packet_id: i32,
        status: TransferStatus,
        data: Bytes,
    ) {
        let max_delayed = ctx.config.transfer.max_delayed_packets;
        let Some(entry) = self.targets.get_mut(&id) else {
            // Common after completion or abort; the sender may still have
            // packets in flight.
            tracing::debug!(transfer_id = %id, packet_id, host = %self.host,
                "packet for unknown transfer");
            return;
        };

        entry.delayed.insert(
            packet_id,
            DelayedPacket {
                packet_id,
                status,
                data,
            },
        );

        self.pump(ctx, id);

        if let Some(entry) = self.targets.get(&id) {
            if entry.delayed.len() > max_delayed {
                tracing::warn!(transfer_id = %id, host = %self.host,
                    buffered = entry.delayed.len(),
                    "too many delayed packets, aborting transfer");
                self.abort(ctx, id);
            }
        }
    }

    /// Deliver every packet that is now contiguous with the last one
    /// delivered, in ascending packet-id order. Both the packet path and
    /// the info replay path end up here.
    fn pump(&mut self, ctx: &mut TransferCtx, id: TransferId) {
        let terminal = loop {
            let Some(entry) = self.targets.get_mut(&id) else {
                return;
            };
            if !entry.target.got_info() {
                return;
            }
            let next = entry.target.next_packet_id();
            let Some(packet) = entry.delayed.remove(&next) else {
                return;
            };

            let ret = entry.target.data_in(ctx, packet.packet_id, &packet.data);
            if ret == TransferStatus::Ok {
                entry.target.set_last_packet_id(packet.packet_id);
            } else if ret.is_terminal() {
                break ret;
            }

            if packet.status.is_terminal() {
                // Done (or an error) rode in with this packet.
                break packet.status;
            }
        };
        self.complete(ctx, id, terminal);
    }

    /// Abort one transfer: notify the peer, fire the completion callback,
    /// drop the target. Unknown ids are a no-op.
    pub fn abort(&mut self, ctx: &mut TransferCtx, id: TransferId) -> bool {
        if !self.targets.contains_key(&id) {
            return false;
        }
        tracing::info!(transfer_id = %id, host = %self.host, "aborting transfer target");
        let abort = TransferMessage::Abort {
            transfer_id: id,
            channel: self.channel,
        };
        if let Err(error) = ctx.msg.send_reliable(self.host, abort) {
            tracing::debug!(host = %self.host, %error, "abort notification failed");
        }
        self.complete(ctx, id, TransferStatus::Abort);
        true
    }

    /// Abort everything. Used when the connection goes away.
    pub fn shutdown(&mut self, ctx: &mut TransferCtx) {
        let ids: Vec<TransferId> = self.targets.keys().copied().collect();
        for id in ids {
            self.abort(ctx, id);
        }
    }

    fn complete(&mut self, ctx: &mut TransferCtx, id: TransferId, status: TransferStatus) {
        if let Some(mut entry) = self.targets.remove(&id) {
            if status == TransferStatus::Done {
                tracing::debug!(transfer_id = %id, "transfer complete");
            } else {
                tracing::info!(transfer_id = %id, ?status, "transfer ended");
            }
            entry.target.completion_callback(ctx, status);
        }
    }
}
