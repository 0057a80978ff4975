//! Transfer manager — inbound protocol dispatch and the periodic tick.
//!
//! One manager owns every connection. The embedding application feeds it
//! decoded messages (`process_message`), calls `update_transfers` once
//! per tick, and reports reliable-delivery failures (`reliable_failed`).
//! Everything runs on one logical thread; the manager is plain owned
//! state passed around by `&mut`.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use skein_core::{ChannelKind, SourceKind, TransferId, TransferMessage, TransferStatus};

use crate::connection::TransferConnection;
use crate::message::TransferCtx;
use crate::source::SourceRegistry;
use crate::target::TransferTarget;

fn channel_index(channel: ChannelKind) -> usize {
    match channel {
        ChannelKind::Misc => 0,
        ChannelKind::Asset => 1,
    }
}

const CHANNEL_KINDS: usize = 2;

pub struct TransferManager {
    connections: HashMap<SocketAddr, TransferConnection>,
    registry: SourceRegistry,
    bits_in: [u64; CHANNEL_KINDS],
    bits_out: [u64; CHANNEL_KINDS],
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            registry: SourceRegistry::new(),
            bits_in: [0; CHANNEL_KINDS],
            bits_out: [0; CHANNEL_KINDS],
        }
    }

    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    /// Bits received on a traffic class since startup.
    pub fn bits_in(&self, channel: ChannelKind) -> u64 {
        self.bits_in[channel_index(channel)]
    }

    /// Bits sent on a traffic class since startup.
    pub fn bits_out(&self, channel: ChannelKind) -> u64 {
        self.bits_out[channel_index(channel)]
    }

    fn connection(&mut self, ctx: &TransferCtx, host: SocketAddr) -> &mut TransferConnection {
        let now = ctx.msg.now_secs();
        self.connections
            .entry(host)
            .or_insert_with(|| TransferConnection::new(host, ctx.config, now))
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────

    /// Route one decoded inbound message. `wire_bytes` is the datagram
    /// size as received, for bandwidth accounting.
    pub fn process_message(
        &mut self,
        ctx: &mut TransferCtx,
        sender: SocketAddr,
        message: TransferMessage,
        wire_bytes: usize,
    ) {
        match message {
            TransferMessage::Request {
                transfer_id,
                channel,
                source_kind,
                priority,
                params,
            } => self.process_request(ctx, sender, transfer_id, channel, source_kind, priority, &params),
            TransferMessage::Info {
                transfer_id,
                channel,
                status,
                size,
                params,
                ..
            } => self.process_info(ctx, sender, transfer_id, channel, status, size, &params),
            TransferMessage::Packet {
                transfer_id,
                channel,
                packet_id,
                status,
                data,
            } => {
                self.bits_in[channel_index(channel)] += (wire_bytes as u64) * 8;
                self.process_packet(ctx, sender, transfer_id, channel, packet_id, status, data);
            }
            TransferMessage::Abort {
                transfer_id,
                channel,
            } => self.process_abort(ctx, sender, transfer_id, channel),
        }
    }

    fn process_request(
        &mut self,
        ctx: &mut TransferCtx,
        sender: SocketAddr,
        transfer_id: TransferId,
        channel: ChannelKind,
        source_kind: SourceKind,
        priority: f32,
        params: &[u8],
    ) {
        let source_channel = self.connection(ctx, sender).source_channel(channel);
        if source_channel.contains(transfer_id) {
            tracing::warn!(transfer_id = %transfer_id, host = %sender,
                "duplicate request for transfer, ignoring");
            return;
        }

        let Some(mut source) = self.registry.create(source_kind, transfer_id, priority) else {
            // Unknown kind, already logged by the registry. Nothing to
            // tear down — no source ever existed.
            return;
        };
        if let Err(error) = source.apply_params(params) {
            tracing::warn!(transfer_id = %transfer_id, %error,
                "bad params in transfer request");
            return;
        }

        self.connection(ctx, sender)
            .source_channel(channel)
            .start(ctx, source);
    }

    fn process_info(
        &mut self,
        ctx: &mut TransferCtx,
        sender: SocketAddr,
        transfer_id: TransferId,
        channel: ChannelKind,
        status: TransferStatus,
        size: u64,
        params: &[u8],
    ) {
        let Some(target_channel) = self
            .connections
            .get_mut(&sender)
            .and_then(|c| c.find_target_channel(channel))
        else {
            tracing::warn!(host = %sender, ?channel, "transfer info for unknown channel");
            return;
        };
        target_channel.process_info(ctx, transfer_id, status, size, params);
    }

    fn process_packet(
        &mut self,
        ctx: &mut TransferCtx,
        sender: SocketAddr,
        transfer_id: TransferId,
        channel: ChannelKind,
        packet_id: i32,
        status: TransferStatus,
        data: Bytes,
    ) {
        let Some(target_channel) = self
            .connections
            .get_mut(&sender)
            .and_then(|c| c.find_target_channel(channel))
        else {
            tracing::warn!(host = %sender, ?channel, "transfer packet for unknown channel");
            return;
        };
        target_channel.process_packet(ctx, transfer_id, packet_id, status, data);
    }

    /// An abort can name either side of a transfer; the receiver does not
    /// know a priori which role it plays for that id. Probing a transfer
    /// that is already gone is a legitimate no-op.
    fn process_abort(
        &mut self,
        ctx: &mut TransferCtx,
        sender: SocketAddr,
        transfer_id: TransferId,
        channel: ChannelKind,
    ) {
        let Some(connection) = self.connections.get_mut(&sender) else {
            tracing::debug!(transfer_id = %transfer_id, host = %sender,
                "abort for unknown connection");
            return;
        };
        if let Some(target_channel) = connection.find_target_channel(channel) {
            if target_channel.abort(ctx, transfer_id) {
                return;
            }
        }
        if let Some(source_channel) = connection.find_source_channel(channel) {
            if source_channel.abort(ctx, transfer_id) {
                return;
            }
        }
        tracing::debug!(transfer_id = %transfer_id, "abort for unknown transfer, ignoring");
    }

    // ── Local operations ──────────────────────────────────────────────────

    /// Open a transfer: register the target locally and send the
    /// TransferRequest. The id baked into the target identifies the
    /// transfer from here on.
    pub fn request_transfer(
        &mut self,
        ctx: &mut TransferCtx,
        host: SocketAddr,
        channel: ChannelKind,
        source_kind: SourceKind,
        source_params: Bytes,
        target: Box<dyn TransferTarget>,
        priority: f32,
    ) -> TransferId {
        self.connection(ctx, host)
            .target_channel(channel)
            .request_transfer(ctx, source_kind, source_params, target, priority)
    }

    /// Locally abort a transfer on either side. Unknown ids are a no-op.
    pub fn abort_transfer(
        &mut self,
        ctx: &mut TransferCtx,
        host: SocketAddr,
        channel: ChannelKind,
        transfer_id: TransferId,
    ) {
        self.process_abort(ctx, host, transfer_id, channel);
    }

    /// Change a queued source's priority.
    pub fn update_priority(
        &mut self,
        host: SocketAddr,
        channel: ChannelKind,
        transfer_id: TransferId,
        priority: f32,
    ) {
        if let Some(source_channel) = self
            .connections
            .get_mut(&host)
            .and_then(|c| c.find_source_channel(channel))
        {
            source_channel.update_priority(transfer_id, priority);
        }
    }

    /// Substrate hook: a reliable control message for this transfer
    /// exhausted its retries. Takes the same abort path as an explicit
    /// TransferAbort, whichever side owns the id.
    pub fn reliable_failed(&mut self, ctx: &mut TransferCtx, transfer_id: TransferId) {
        tracing::warn!(transfer_id = %transfer_id,
            "reliable delivery failed, aborting transfer");
        for connection in self.connections.values_mut() {
            for source_channel in connection.source_channels_mut() {
                if source_channel.abort(ctx, transfer_id) {
                    return;
                }
            }
            for target_channel in connection.target_channels_mut() {
                if target_channel.abort(ctx, transfer_id) {
                    return;
                }
            }
        }
        tracing::debug!(transfer_id = %transfer_id,
            "reliable failure for unknown transfer, ignoring");
    }

    /// One cooperative tick: rebalance every connection's throttles and
    /// let each source channel send within its budget.
    pub fn update_transfers(&mut self, ctx: &mut TransferCtx) {
        for connection in self.connections.values_mut() {
            for (channel, bits) in connection.update_transfers(ctx) {
                self.bits_out[channel_index(channel)] += bits;
            }
        }
    }

    /// Tear down every transfer to a host and drop the connection.
    /// Cleaning up a host that never transferred anything is a no-op.
    pub fn cleanup_connection(&mut self, ctx: &mut TransferCtx, host: SocketAddr) {
        if let Some(mut connection) = self.connections.remove(&host) {
            tracing::info!(host = %host, "cleaning up transfer connection");
            connection.shutdown(ctx);
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_source(&mut self, host: SocketAddr, channel: ChannelKind, id: TransferId) -> bool {
        self.connections
            .get_mut(&host)
            .and_then(|c| c.find_source_channel(channel))
            .is_some_and(|c| c.contains(id))
    }

    pub fn has_target(&mut self, host: SocketAddr, channel: ChannelKind, id: TransferId) -> bool {
        self.connections
            .get_mut(&host)
            .and_then(|c| c.find_target_channel(channel))
            .is_some_and(|c| c.contains(id))
    }
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}
