//! Dead-router detection: a peer that never acknowledges a tracked
//! forward is reported exactly once within twice the receipt TTL.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshway::prelude::*;
use meshway::flags;

const TTL: Duration = Duration::from_millis(100);

#[test]
fn silent_peer_is_reported_once() {
    let router = MsgRouter::new(
        "physical://localhost/hub",
        RouterSettings::default().with_dead_router_ttl(TTL),
    )
    .unwrap();
    router.start();

    // One half attached; the other held by the test and never serviced,
    // so no receipt ever comes back.
    let (ours, theirs) = InprocChannel::pair();
    let peer_ep = Endpoint::parse("physical://localhost/deadpeer").unwrap();
    ours.set_peer_ep(peer_ep.clone());
    router.attach_channel(ours, false);

    let fired = Arc::new(AtomicUsize::new(0));
    let (dead_tx, dead_rx) = flume::unbounded();
    let fired2 = fired.clone();
    router.on_dead_router(move |ep, _set_id| {
        fired2.fetch_add(1, Ordering::SeqCst);
        let _ = dead_tx.send(ep.clone());
    });

    let mut msg = Msg::plain();
    msg.set_to(Some(peer_ep.clone()));
    msg.set_flag(flags::RECEIPT_REQUEST);
    router.send(msg).unwrap();
    assert_eq!(router.outstanding_receipts(), 1);

    // The frame did reach the (unserviced) peer half.
    assert!(theirs.inbound().recv_timeout(Duration::from_secs(1)).is_ok());

    // The callback must fire within 2x the TTL, give or take scheduling.
    let dead_ep = dead_rx.recv_timeout(TTL * 2 + Duration::from_millis(100)).unwrap();
    assert_eq!(dead_ep, peer_ep);
    assert_eq!(router.outstanding_receipts(), 0);

    // Exactly once for that message.
    assert!(dead_rx.recv_timeout(TTL * 3).is_err());
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    router.stop();
}

#[test]
fn receipt_prevents_the_callback() {
    let router = MsgRouter::new(
        "physical://localhost/hub",
        RouterSettings::default().with_dead_router_ttl(TTL),
    )
    .unwrap();
    router.start();

    let (ours, theirs) = InprocChannel::pair();
    let peer_ep = Endpoint::parse("physical://localhost/alivepeer").unwrap();
    ours.set_peer_ep(peer_ep.clone());
    router.attach_channel(ours, false);

    let (dead_tx, dead_rx) = flume::unbounded();
    router.on_dead_router(move |ep, _| {
        let _ = dead_tx.send(ep.clone());
    });

    let mut msg = Msg::plain();
    msg.set_to(Some(peer_ep));
    msg.set_flag(flags::RECEIPT_REQUEST);
    msg.set_msg_id(uuid::Uuid::new_v4());
    let msg_id = msg.msg_id();
    router.send(msg).unwrap();
    assert_eq!(router.outstanding_receipts(), 1);

    // Hand-craft the peer's receipt before the TTL runs out.
    let mut receipt = Msg::from_payload(meshway::ReceiptMsg { for_msg_id: msg_id });
    receipt.set_to(Some(Endpoint::parse("physical://localhost/hub").unwrap()));
    receipt.set_from(Some(Endpoint::parse("physical://localhost/alivepeer").unwrap()));
    let frame = meshway::encode_msg(&mut receipt, &meshway::TypeRegistry::new()).unwrap();
    theirs.send_frame(frame).unwrap();

    // Tracker clears and the callback stays silent.
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while router.outstanding_receipts() != 0 {
        assert!(std::time::Instant::now() < deadline, "receipt never cleared");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(dead_rx.recv_timeout(TTL * 3).is_err());

    router.stop();
}
