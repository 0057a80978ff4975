//! Asset-layer scenarios: coalescing, timeouts, circuit teardown.

use crate::*;

use skein_asset::AssetError;
use skein_core::{AssetId, AssetKind, ObjectStore, TransferMessage};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239) as u8).collect()
}

#[test]
fn coalesced_requests_complete_with_one_wire_transfer() {
    let mut a = Node::requester();
    let mut b = Node::provider();

    let asset_id = AssetId::generate();
    let content = pattern(2500);
    b.store.insert(asset_id, AssetKind::Texture, content.clone());

    let rx_first = a.get_asset(asset_id, AssetKind::Texture, Some(1));
    let rx_second = a.get_asset(asset_id, AssetKind::Texture, Some(2));

    // Two callers, one wire request.
    let outbound = a.outbound();
    let requests: Vec<_> = outbound
        .iter()
        .filter(|(_, m)| matches!(m, TransferMessage::Request { .. }))
        .collect();
    assert_eq!(requests.len(), 1);
    for (_, message) in &outbound {
        b.deliver(a.addr, message.clone());
    }

    run_until_quiet(&mut a, &mut b);

    assert_eq!(rx_first.try_recv().unwrap(), Ok(()));
    assert!(rx_first.try_recv().is_err(), "callback fired twice");
    assert_eq!(rx_second.try_recv().unwrap(), Ok(()));
    assert!(rx_second.try_recv().is_err(), "callback fired twice");

    assert_eq!(
        &a.store.read(asset_id, AssetKind::Texture, 0, 2500).unwrap()[..],
        &content[..]
    );
    // A later request is served straight from the local store.
    let rx_cached = a.get_asset(asset_id, AssetKind::Texture, None);
    assert_eq!(rx_cached.try_recv().unwrap(), Ok(()));
    assert!(a.outbound().is_empty());
}

#[test]
fn requester_side_circuit_teardown_fails_pending_requests() {
    let mut a = Node::requester();
    let mut b = Node::provider();

    let asset_id = AssetId::generate();
    b.store.insert(asset_id, AssetKind::Texture, pattern(1000));

    let rx = a.get_asset(asset_id, AssetKind::Texture, None);
    let outbound = a.outbound();
    for (_, message) in outbound {
        b.deliver(a.addr, message);
    }

    // The connection to the provider goes away.
    a.with_ctx(|manager, _, ctx| manager.cleanup_connection(ctx, addr_b()));
    a.tick();

    assert_eq!(rx.try_recv().unwrap(), Err(AssetError::Aborted));
    assert_eq!(a.manager.connection_count(), 0);
    assert_eq!(a.storage.pending_download_count(), 0);
}

#[test]
fn unanswered_requests_time_out() {
    let mut a = Node::requester();

    let rx = a.get_asset(AssetId::generate(), AssetKind::Texture, None);
    assert_eq!(a.storage.pending_download_count(), 1);

    // The provider never answers. The absolute timeout reaps the request.
    a.advance(301.0);
    a.with_ctx(|_, storage, ctx| storage.check_for_timeouts(ctx));

    assert_eq!(rx.try_recv().unwrap(), Err(AssetError::Timeout));
    assert_eq!(a.storage.pending_download_count(), 0);
}
