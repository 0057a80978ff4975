//! Per-host aggregate of transfer channels and bandwidth state.
//!
//! A connection owns one throttle group and lazily creates one source and
//! one target channel per traffic class as transfers appear. Connections
//! are created on first use and live until the manager tears the host
//! down.

use std::net::SocketAddr;

use skein_core::config::TransferConfig;
use skein_core::ChannelKind;

use crate::channel::{SourceChannel, TargetChannel};
use crate::message::TransferCtx;
use crate::throttle::ThrottleGroup;

pub struct TransferConnection {
    host: SocketAddr,
    throttles: ThrottleGroup,
    source_channels: Vec<SourceChannel>,
    target_channels: Vec<TargetChannel>,
}

impl TransferConnection {
    pub fn new(host: SocketAddr, config: &TransferConfig, now: f64) -> Self {
        Self {
            host,
            throttles: ThrottleGroup::new(&config.throttle, &config.rebalance, now),
            source_channels: Vec::new(),
            target_channels: Vec::new(),
        }
    }

    pub fn host(&self) -> SocketAddr {
        self.host
    }

    pub fn throttles(&mut self) -> &mut ThrottleGroup {
        &mut self.throttles
    }

    /// The source channel for a traffic class, created on first use.
    pub fn source_channel(&mut self, channel: ChannelKind) -> &mut SourceChannel {
        if let Some(index) = self
            .source_channels
            .iter()
            .position(|c| c.channel() == channel)
        {
            return &mut self.source_channels[index];
        }
        let index = self.source_channels.len();
        self.source_channels
            .push(SourceChannel::new(channel, self.host));
        &mut self.source_channels[index]
    }

    /// The target channel for a traffic class, created on first use.
    pub fn target_channel(&mut self, channel: ChannelKind) -> &mut TargetChannel {
        if let Some(index) = self
            .target_channels
            .iter()
            .position(|c| c.channel() == channel)
        {
            return &mut self.target_channels[index];
        }
        let index = self.target_channels.len();
        self.target_channels
            .push(TargetChannel::new(channel, self.host));
        &mut self.target_channels[index]
    }

    pub fn find_source_channel(&mut self, channel: ChannelKind) -> Option<&mut SourceChannel> {
        self.source_channels
            .iter_mut()
            .find(|c| c.channel() == channel)
    }

    pub fn find_target_channel(&mut self, channel: ChannelKind) -> Option<&mut TargetChannel> {
        self.target_channels
            .iter_mut()
            .find(|c| c.channel() == channel)
    }

    pub fn source_channels_mut(&mut self) -> impl Iterator<Item = &mut SourceChannel> {
        self.source_channels.iter_mut()
    }

    pub fn target_channels_mut(&mut self) -> impl Iterator<Item = &mut TargetChannel> {
        self.target_channels.iter_mut()
    }

    /// One tick: rebalance the throttles, then let every source channel
    /// send within its budget. Returns (channel, bits sent) pairs for the
    /// manager's accounting. Target channels have nothing to do on a tick.
    pub fn update_transfers(&mut self, ctx: &mut TransferCtx) -> Vec<(ChannelKind, u64)> {
        let now = ctx.msg.now_secs();
        self.throttles.dynamic_adjust(now);

        let mut sent = Vec::with_capacity(self.source_channels.len());
        for channel in &mut self.source_channels {
            let bits = channel.update(ctx, &mut self.throttles);
            if bits > 0 {
                sent.push((channel.channel(), bits));
            }
        }
        sent
    }

    /// Abort every live transfer on this connection, both directions.
    pub fn shutdown(&mut self, ctx: &mut TransferCtx) {
        for channel in &mut self.source_channels {
            channel.shutdown(ctx);
        }
        for channel in &mut self.target_channels {
            channel.shutdown(ctx);
        }
    }
}
