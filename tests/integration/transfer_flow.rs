//! End-to-end transfer protocol scenarios.

use crate::*;

use bytes::Bytes;
use skein_core::{
    AssetId, AssetKind, ChannelKind, ObjectStore, SourceKind, TransferId, TransferMessage,
    TransferStatus,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Pull the single TransferRequest out of a node's outbound queue.
fn take_request(node: &mut Node) -> (TransferId, TransferMessage) {
    let mut out = node.outbound();
    assert_eq!(out.len(), 1);
    let (_, message) = out.remove(0);
    let id = match &message {
        TransferMessage::Request {
            transfer_id,
            channel,
            source_kind,
            ..
        } => {
            assert_eq!(*channel, ChannelKind::Asset);
            assert_eq!(*source_kind, SourceKind::Asset);
            *transfer_id
        }
        other => panic!("expected request, got {other:?}"),
    };
    (id, message)
}

/// Tick the provider until it has emitted `count` packets.
fn collect_packets(node: &mut Node, count: usize) -> Vec<TransferMessage> {
    let mut packets = Vec::new();
    for _ in 0..32 {
        node.tick();
        node.advance(1.0);
        for (_, message) in node.outbound() {
            if matches!(message, TransferMessage::Packet { .. }) {
                packets.push(message);
            }
        }
        if packets.len() >= count {
            return packets;
        }
    }
    panic!("provider only produced {} of {count} packets", packets.len());
}

#[test]
fn out_of_order_packets_deliver_a_complete_asset() {
    let mut a = Node::requester();
    let mut b = Node::provider();
    // 4096 bytes at 1024 per packet: exactly four packets.
    b.config.transfer.packet_data_size = 1024;

    let asset_id = AssetId::generate();
    let content = pattern(4096);
    b.store.insert(asset_id, AssetKind::Texture, content.clone());

    let rx = a.get_asset(asset_id, AssetKind::Texture, None);
    let (transfer_id, request) = take_request(&mut a);
    b.deliver(a.addr, request);

    // The provider answers with size and then streams four packets.
    let mut info_seen = false;
    for (_, message) in b.outbound() {
        if let TransferMessage::Info { status, size, .. } = &message {
            assert_eq!(*status, TransferStatus::Ok);
            assert_eq!(*size, 4096);
            info_seen = true;
        }
        a.deliver(b.addr, message);
    }
    assert!(info_seen, "no transfer info answered");

    let packets = collect_packets(&mut b, 4);
    assert_eq!(packets.len(), 4);

    // Deliver the packets out of order: 2, 0, 1, 3.
    for wanted in [2, 0, 1, 3] {
        let packet = packets
            .iter()
            .find(|m| matches!(m, TransferMessage::Packet { packet_id, .. } if *packet_id == wanted))
            .expect("packet missing")
            .clone();
        a.deliver(b.addr, packet);
    }
    a.tick();

    assert_eq!(rx.try_recv().unwrap(), Ok(()));
    assert_eq!(a.store.size(asset_id, AssetKind::Texture).unwrap(), 4096);
    assert_eq!(
        &a.store.read(asset_id, AssetKind::Texture, 0, 4096).unwrap()[..],
        &content[..]
    );
    assert!(!a.manager.has_target(b.addr, ChannelKind::Asset, transfer_id));
}

#[test]
fn error_info_tears_down_the_target_before_any_packet() {
    let mut a = Node::requester();
    let mut b = Node::provider();

    // The provider has no such asset.
    let asset_id = AssetId::generate();
    let rx = a.get_asset(asset_id, AssetKind::Sound, None);
    let (transfer_id, request) = take_request(&mut a);
    b.deliver(a.addr, request);

    let mut out = b.outbound();
    assert_eq!(out.len(), 1);
    let (_, info) = out.remove(0);
    match &info {
        TransferMessage::Info { status, .. } => {
            assert_eq!(*status, TransferStatus::UnknownSource)
        }
        other => panic!("expected info, got {other:?}"),
    }
    a.deliver(b.addr, info);
    a.tick();

    assert_eq!(rx.try_recv().unwrap(), Err(skein_asset::AssetError::NotFound));
    assert!(!a.manager.has_target(b.addr, ChannelKind::Asset, transfer_id));

    // A packet that would have been in flight is quietly ignored.
    a.deliver(
        b.addr,
        TransferMessage::Packet {
            transfer_id,
            channel: ChannelKind::Asset,
            packet_id: 0,
            status: TransferStatus::Ok,
            data: Bytes::from_static(b"late"),
        },
    );
    assert!(!a.store.exists(asset_id, AssetKind::Sound));
}

#[test]
fn local_abort_notifies_the_peer_and_is_idempotent() {
    let mut a = Node::requester();
    let mut b = Node::provider();

    let asset_id = AssetId::generate();
    b.store.insert(asset_id, AssetKind::Texture, pattern(3000));

    let rx = a.get_asset(asset_id, AssetKind::Texture, None);
    let (transfer_id, request) = take_request(&mut a);
    b.deliver(a.addr, request);
    for (_, message) in b.outbound() {
        a.deliver(b.addr, message);
    }

    // The requester changes its mind.
    a.with_ctx(|manager, _, ctx| {
        manager.abort_transfer(ctx, addr_b(), ChannelKind::Asset, transfer_id)
    });
    a.tick();
    assert_eq!(rx.try_recv().unwrap(), Err(skein_asset::AssetError::Aborted));
    assert!(!a.manager.has_target(b.addr, ChannelKind::Asset, transfer_id));

    // A second local abort for the same id is a no-op.
    a.with_ctx(|manager, _, ctx| {
        manager.abort_transfer(ctx, addr_b(), ChannelKind::Asset, transfer_id)
    });

    // The abort notification tears down the provider's source; replaying
    // it is also a no-op.
    let aborts: Vec<TransferMessage> = a
        .outbound()
        .into_iter()
        .map(|(_, m)| m)
        .filter(|m| matches!(m, TransferMessage::Abort { .. }))
        .collect();
    assert_eq!(aborts.len(), 1);
    b.deliver(a.addr, aborts[0].clone());
    assert!(!b.manager.has_source(a.addr, ChannelKind::Asset, transfer_id));
    b.deliver(a.addr, aborts[0].clone());

    // Any packet the provider had in flight lands on a dead transfer.
    a.deliver(
        b.addr,
        TransferMessage::Packet {
            transfer_id,
            channel: ChannelKind::Asset,
            packet_id: 0,
            status: TransferStatus::Ok,
            data: Bytes::from_static(b"late"),
        },
    );
}

#[test]
fn reliable_delivery_failure_aborts_the_transfer() {
    let mut a = Node::requester();
    let mut b = Node::provider();

    let asset_id = AssetId::generate();
    b.store.insert(asset_id, AssetKind::Texture, pattern(2000));

    let rx = a.get_asset(asset_id, AssetKind::Texture, None);
    let (transfer_id, request) = take_request(&mut a);
    b.deliver(a.addr, request);
    b.outbound(); // discard the info

    // The substrate reports that a reliable packet for this transfer
    // exhausted its retries on the provider side.
    b.with_ctx(|manager, _, ctx| manager.reliable_failed(ctx, transfer_id));
    assert!(!b.manager.has_source(a.addr, ChannelKind::Asset, transfer_id));

    // The abort propagates to the requester.
    for (_, message) in b.outbound() {
        a.deliver(b.addr, message);
    }
    a.tick();
    assert_eq!(rx.try_recv().unwrap(), Err(skein_asset::AssetError::Aborted));
}

#[test]
fn higher_priority_transfers_are_serviced_first() {
    let mut a = Node::requester();
    let mut b = Node::provider();
    // Tight budget: roughly one packet per tick, so ordering is visible.
    b.config.throttle.asset_bps = 9000.0;

    let low_asset = AssetId::generate();
    let high_asset = AssetId::generate();
    b.store.insert(low_asset, AssetKind::Texture, pattern(2000));
    b.store.insert(high_asset, AssetKind::Texture, pattern(2000));

    // Request the low-priority asset first so arrival order and service
    // order differ.
    let _rx_low = a.get_asset(low_asset, AssetKind::Texture, None);
    let (low_id, low_request) = take_request(&mut a);

    let (tx, _rx_high) = std::sync::mpsc::channel();
    a.with_ctx(|manager, storage, ctx| {
        storage.get_asset_data(
            ctx,
            manager,
            high_asset,
            AssetKind::Texture,
            true, // priority flag
            None,
            Box::new(move |_, _, result| {
                let _ = tx.send(result);
            }),
        );
    });
    let (high_id, high_request) = take_request(&mut a);

    b.deliver(a.addr, low_request);
    b.deliver(a.addr, high_request);
    b.outbound(); // discard the two infos

    let packets = collect_packets(&mut b, 4);
    let service_order: Vec<TransferId> = packets
        .iter()
        .filter_map(|m| match m {
            TransferMessage::Packet { transfer_id, .. } => Some(*transfer_id),
            _ => None,
        })
        .collect();
    assert_eq!(service_order, vec![high_id, high_id, low_id, low_id]);
}
